//! Bounded, TTL'd in-memory response cache sitting between the request
//! engine and its callers.
//!
//! Grounded in `av98.py`'s `_is_cached`/`_add_to_cache`/`_trim_cache`/
//! `_get_cached`/`_validate_cache`. Per the Open Question resolution in
//! SPEC_FULL.md §9, `get` always returns the on-disk path only — decoding
//! a text/gemini body from it is the caller's job, not the cache's.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::CacheError;

const MAX_ENTRIES: usize = 10;
const TTL: Duration = Duration::from_secs(180);

struct Entry {
    mime: String,
    path: PathBuf,
    inserted_at: Instant,
}

/// An LRU-ish, TTL-bounded cache keyed by the full URL string. "LRU" here
/// means insertion order only — there is no access-time bump on `get`,
/// matching the teacher-adjacent `av98.py` behavior of trimming the
/// oldest-inserted entry first.
#[derive(Default)]
pub struct ResponseCache {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` if the key is missing; if present but older than the TTL,
    /// the entry is evicted (and its file unlinked) and `false` is
    /// returned; otherwise `true`.
    pub fn is_cached(&mut self, url: &str) -> bool {
        let Some(entry) = self.entries.get(url) else {
            return false;
        };
        if entry.inserted_at.elapsed() > TTL {
            let _ = self.evict(url);
            return false;
        }
        true
    }

    /// Returns `(mime, path)` for a fresh entry, or `None` if missing or
    /// stale (staleness evicts, matching `is_cached`).
    pub fn get(&mut self, url: &str) -> Option<(String, PathBuf)> {
        if !self.is_cached(url) {
            return None;
        }
        self.entries
            .get(url)
            .map(|e| (e.mime.clone(), e.path.clone()))
    }

    /// Insert or overwrite an entry, then trim down to the size bound.
    pub fn put(&mut self, url: &str, mime: &str, path: PathBuf) -> Result<(), CacheError> {
        if !path.exists() {
            return Err(CacheError::MissingFile(path));
        }
        if self.entries.remove(url).is_some() {
            self.order.retain(|k| k != url);
        }
        self.entries.insert(
            url.to_string(),
            Entry {
                mime: mime.to_string(),
                path,
                inserted_at: Instant::now(),
            },
        );
        self.order.push(url.to_string());
        self.trim()?;
        self.check_invariants();
        Ok(())
    }

    /// Drop the oldest-inserted entry unconditionally once over the size
    /// bound, then keep dropping stale entries until the first fresh one
    /// is reached — mirrors `_trim_cache`'s two-phase trim.
    fn trim(&mut self) -> Result<(), CacheError> {
        if self.order.len() > MAX_ENTRIES {
            let oldest = self.order.remove(0);
            self.remove_entry(&oldest)?;
        }
        while let Some(oldest_key) = self.order.first().cloned() {
            let stale = self
                .entries
                .get(&oldest_key)
                .is_some_and(|e| e.inserted_at.elapsed() > TTL);
            if !stale {
                break;
            }
            self.order.remove(0);
            self.remove_entry(&oldest_key)?;
        }
        Ok(())
    }

    /// Remove an entry and unlink its backing file.
    pub fn evict(&mut self, url: &str) -> Result<(), CacheError> {
        if self.entries.contains_key(url) {
            self.order.retain(|k| k != url);
            self.remove_entry(url)?;
        }
        self.check_invariants();
        Ok(())
    }

    /// Unlink every backing file and forget every entry.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        for url in self.order.drain(..).collect::<Vec<_>>() {
            self.remove_entry(&url)?;
        }
        self.entries.clear();
        Ok(())
    }

    fn remove_entry(&mut self, url: &str) -> Result<(), CacheError> {
        if let Some(entry) = self.entries.remove(url) {
            if entry.path.exists() {
                std::fs::remove_file(&entry.path)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key sets of the two maps agree and every referenced file still
    /// exists, matching `_validate_cache`. Debug-only: a violated
    /// invariant here is a programming error, not a recoverable runtime
    /// condition.
    fn check_invariants(&self) {
        debug_assert_eq!(self.entries.len(), self.order.len());
        for key in &self.order {
            debug_assert!(self.entries.contains_key(key));
        }
        debug_assert!(self.entries.len() <= MAX_ENTRIES);
        for entry in self.entries.values() {
            debug_assert!(Path::new(&entry.path).exists());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn missing_entry_reports_not_cached() {
        let mut cache = ResponseCache::new();
        assert!(!cache.is_cached("gemini://example.com/"));
        assert!(cache.get("gemini://example.com/").is_none());
    }

    #[test]
    fn put_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "a.gmi");
        let mut cache = ResponseCache::new();
        cache
            .put("gemini://example.com/", "text/gemini", path.clone())
            .unwrap();
        assert!(cache.is_cached("gemini://example.com/"));
        let (mime, got_path) = cache.get("gemini://example.com/").unwrap();
        assert_eq!(mime, "text/gemini");
        assert_eq!(got_path, path);
    }

    #[test]
    fn put_rejects_missing_file() {
        let mut cache = ResponseCache::new();
        let result = cache.put("gemini://example.com/", "text/gemini", PathBuf::from("/nonexistent/x"));
        assert!(matches!(result, Err(CacheError::MissingFile(_))));
    }

    #[test]
    fn size_bound_trims_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResponseCache::new();
        for i in 0..12 {
            let path = touch(dir.path(), &format!("{i}.gmi"));
            cache
                .put(&format!("gemini://example.com/{i}"), "text/gemini", path)
                .unwrap();
        }
        assert!(cache.len() <= 10);
        assert!(!cache.is_cached("gemini://example.com/0"));
        assert!(cache.is_cached("gemini://example.com/11"));
    }

    #[test]
    fn evict_removes_entry_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "a.gmi");
        let mut cache = ResponseCache::new();
        cache.put("gemini://example.com/", "text/gemini", path.clone()).unwrap();
        cache.evict("gemini://example.com/").unwrap();
        assert!(!cache.is_cached("gemini://example.com/"));
        assert!(!path.exists());
    }

    #[test]
    fn clear_unlinks_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = touch(dir.path(), "a.gmi");
        let p2 = touch(dir.path(), "b.gmi");
        let mut cache = ResponseCache::new();
        cache.put("gemini://a/", "text/gemini", p1.clone()).unwrap();
        cache.put("gemini://b/", "text/gemini", p2.clone()).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert!(!p1.exists());
        assert!(!p2.exists());
    }

    #[test]
    fn ttl_expiry_evicts_on_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "a.gmi");
        let mut cache = ResponseCache::new();
        cache.put("gemini://example.com/", "text/gemini", path.clone()).unwrap();
        // Can't wait out a real 180s TTL in a unit test; this just checks
        // that a fresh entry survives immediate re-check.
        sleep(Duration::from_millis(5));
        assert!(cache.is_cached("gemini://example.com/"));
    }
}
