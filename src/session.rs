//! Per-session navigation state the request engine reads and mutates:
//! history (a stack with a movable cursor), the permanent-redirect map,
//! the in-flight redirect-chain set, the session's half of the two-
//! mapping identity/host split, and the most recently produced temp
//! files.
//!
//! Grounded in `av98.py`'s `GeminiClient.__init__` instance state and
//! `_update_history`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::identity::IdentityRef;
use crate::url::GeminiUrl;

/// Navigation history: a list of visited URLs plus a cursor into it.
/// Visiting a new URL truncates any entries ahead of the cursor before
/// appending, so that going back and then navigating somewhere new
/// discards the abandoned forward branch — matches `_update_history`.
#[derive(Default)]
pub struct History {
    entries: Vec<GeminiUrl>,
    cursor: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `url` unless it equals the entry currently under the cursor
    /// (a silent no-op, matching the teacher-adjacent `_update_history`'s
    /// early return on a repeat-visit to the current entry).
    pub fn push(&mut self, url: GeminiUrl) {
        if let Some(cursor) = self.cursor {
            if self.entries.get(cursor) == Some(&url) {
                return;
            }
            self.entries.truncate(cursor + 1);
        }
        self.entries.push(url);
        self.cursor = Some(self.entries.len() - 1);
    }

    pub fn current(&self) -> Option<&GeminiUrl> {
        self.cursor.and_then(|c| self.entries.get(c))
    }

    pub fn back(&mut self) -> Option<&GeminiUrl> {
        let cursor = self.cursor?;
        if cursor == 0 {
            return None;
        }
        self.cursor = Some(cursor - 1);
        self.current()
    }

    pub fn forward(&mut self) -> Option<&GeminiUrl> {
        let cursor = self.cursor?;
        if cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor = Some(cursor + 1);
        self.current()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The remaining session state the request engine owns directly: the
/// permanent-redirect shortcut map, the per-fetch redirect-chain set
/// (cleared/reused per the redirect rules), the session's side of the
/// client-identity/host split, and the most recent temp file handles.
#[derive(Default)]
pub struct SessionState {
    pub history: History,
    /// Source URL (as formatted) -> destination URL, populated on every
    /// 31 response so a later request to the same source skips straight
    /// to the destination without re-contacting the original host.
    pub permanent_redirects: HashMap<String, GeminiUrl>,
    /// URLs already visited in the current logical fetch's redirect
    /// chain, used for loop/self-redirect detection. Cleared at the
    /// start of a fetch that wasn't itself continuing a 3x chain.
    pub redirect_chain: HashSet<String>,
    /// The last identity shown to each host, consulted for the
    /// re-activation offer when no identity is currently active.
    pub last_identity_per_host: HashMap<String, IdentityRef>,
    /// The most recently rendered text/gemini page, on disk.
    pub idx_filename: Option<PathBuf>,
    /// The most recent raw response body, on disk.
    pub tmp_filename: Option<PathBuf>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a permanent redirect (source -> destination), keyed by the
    /// source URL's formatted string.
    pub fn record_permanent_redirect(&mut self, source: &GeminiUrl, destination: GeminiUrl) {
        self.permanent_redirects.insert(source.as_str(), destination);
    }

    pub fn permanent_redirect_target(&self, source: &GeminiUrl) -> Option<&GeminiUrl> {
        self.permanent_redirects.get(&source.as_str())
    }

    /// Start a fresh redirect chain, unless `continuing_3x` says this
    /// fetch is itself a restart following a 3x status — in that case
    /// the existing chain (and its loop-detection history) carries over.
    pub fn reset_redirect_chain(&mut self, continuing_3x: bool) {
        if !continuing_3x {
            self.redirect_chain.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(s: &str) -> GeminiUrl {
        GeminiUrl::parse(s).unwrap()
    }

    #[test]
    fn push_appends_and_moves_cursor() {
        let mut h = History::new();
        h.push(u("gemini://a/"));
        h.push(u("gemini://b/"));
        assert_eq!(h.len(), 2);
        assert_eq!(h.current(), Some(&u("gemini://b/")));
    }

    #[test]
    fn repeat_visit_to_current_is_noop() {
        let mut h = History::new();
        h.push(u("gemini://a/"));
        h.push(u("gemini://a/"));
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn visiting_after_back_truncates_forward_branch() {
        let mut h = History::new();
        h.push(u("gemini://a/"));
        h.push(u("gemini://b/"));
        h.push(u("gemini://c/"));
        h.back();
        h.push(u("gemini://d/"));
        assert_eq!(h.len(), 3);
        assert_eq!(h.current(), Some(&u("gemini://d/")));
    }

    #[test]
    fn back_and_forward_move_cursor() {
        let mut h = History::new();
        h.push(u("gemini://a/"));
        h.push(u("gemini://b/"));
        assert_eq!(h.back(), Some(&u("gemini://a/")));
        assert_eq!(h.forward(), Some(&u("gemini://b/")));
        assert_eq!(h.forward(), None);
    }

    #[test]
    fn back_at_start_is_none() {
        let mut h = History::new();
        h.push(u("gemini://a/"));
        assert_eq!(h.back(), None);
    }

    #[test]
    fn permanent_redirect_roundtrip() {
        let mut s = SessionState::new();
        let src = u("gemini://a/x");
        let dst = u("gemini://b/y");
        s.record_permanent_redirect(&src, dst.clone());
        assert_eq!(s.permanent_redirect_target(&src), Some(&dst));
    }

    #[test]
    fn redirect_chain_resets_unless_continuing() {
        let mut s = SessionState::new();
        s.redirect_chain.insert("gemini://a/".to_string());
        s.reset_redirect_chain(true);
        assert!(!s.redirect_chain.is_empty());
        s.reset_redirect_chain(false);
        assert!(s.redirect_chain.is_empty());
    }
}
