//! TOFU (trust-on-first-use) certificate pinning store.
//!
//! Backed by a small relational database (`cert_cache` table) plus a
//! companion directory of raw DER blobs, as specified — a step up from
//! the teacher's flat JSON `TofuStore`, grounded in `av98.py`'s
//! `_connect_to_tofu_db`/`_validate_cert` sqlite3 usage.

use std::path::{Path, PathBuf};

use log::info;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};

use crate::error::TrustStoreError;

/// One row of the `cert_cache` table: a fingerprint ever observed for a
/// given (hostname, address) pair.
#[derive(Debug, Clone)]
pub struct PinnedCert {
    pub hostname: String,
    pub address: String,
    pub fingerprint: String,
    pub first_seen: i64,
    pub last_seen: i64,
    pub count: u32,
}

/// The outcome of checking a freshly observed certificate against stored
/// pins for a (hostname, address) pair.
pub enum Verdict {
    /// No prior record existed; the new fingerprint has been recorded.
    FirstContact,
    /// The fingerprint matched an existing pin; its counters were bumped.
    Matched,
    /// The fingerprint does not match any pin on file. The caller should
    /// ask the user whether to accept it (and if so, call
    /// [`TrustStore::record`] to pin it) or abort.
    Mismatch { prior_count: u32 },
}

pub struct TrustStore {
    conn: Connection,
    blob_dir: PathBuf,
}

impl TrustStore {
    /// Open (creating if necessary) the database at `db_path`, storing
    /// certificate blobs under `blob_dir`.
    pub fn open(db_path: &Path, blob_dir: PathBuf) -> Result<Self, TrustStoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&blob_dir)?;
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cert_cache (
                hostname   TEXT NOT NULL,
                address    TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                first_seen  INTEGER NOT NULL,
                last_seen   INTEGER NOT NULL,
                count       INTEGER NOT NULL,
                PRIMARY KEY (hostname, address, fingerprint)
            )",
            [],
        )?;
        Ok(Self { conn, blob_dir })
    }

    /// Open an in-memory store, useful for tests.
    pub fn open_in_memory() -> Result<Self, TrustStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute(
            "CREATE TABLE cert_cache (
                hostname   TEXT NOT NULL,
                address    TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                first_seen  INTEGER NOT NULL,
                last_seen   INTEGER NOT NULL,
                count       INTEGER NOT NULL,
                PRIMARY KEY (hostname, address, fingerprint)
            )",
            [],
        )?;
        Ok(Self {
            conn,
            blob_dir: std::env::temp_dir(),
        })
    }

    pub fn lookup(&self, hostname: &str, address: &str) -> Result<Vec<PinnedCert>, TrustStoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT hostname, address, fingerprint, first_seen, last_seen, count
             FROM cert_cache WHERE hostname = ?1 AND address = ?2",
        )?;
        let rows = stmt.query_map(params![hostname, address], |row| {
            Ok(PinnedCert {
                hostname: row.get(0)?,
                address: row.get(1)?,
                fingerprint: row.get(2)?,
                first_seen: row.get(3)?,
                last_seen: row.get(4)?,
                count: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Check a freshly observed certificate fingerprint against pins for
    /// `(hostname, address)`. Does not write a mismatch to the database —
    /// call [`Self::record`] once the user (or caller) accepts it.
    pub fn check(
        &self,
        hostname: &str,
        address: &str,
        fingerprint: &str,
    ) -> Result<Verdict, TrustStoreError> {
        let rows = self.lookup(hostname, address)?;
        if rows.is_empty() {
            return Ok(Verdict::FirstContact);
        }
        if let Some(hit) = rows.iter().find(|r| r.fingerprint == fingerprint) {
            let _ = hit;
            return Ok(Verdict::Matched);
        }
        let prior_count = rows.iter().map(|r| r.count).max().unwrap_or(0);
        Ok(Verdict::Mismatch { prior_count })
    }

    /// Record a fingerprint for `(hostname, address)`: insert a fresh row
    /// with count=1, or bump `last_seen`/`count` on an existing one. Only
    /// call this after [`Self::write_blob`] has succeeded, so the table
    /// never references a missing blob.
    pub fn record(
        &self,
        hostname: &str,
        address: &str,
        fingerprint: &str,
        now: i64,
    ) -> Result<(), TrustStoreError> {
        let updated = self.conn.execute(
            "UPDATE cert_cache SET last_seen = ?4, count = count + 1
             WHERE hostname = ?1 AND address = ?2 AND fingerprint = ?3",
            params![hostname, address, fingerprint, now],
        )?;
        if updated == 0 {
            info!("trust: pinning new certificate for {hostname} ({address})");
            self.conn.execute(
                "INSERT INTO cert_cache (hostname, address, fingerprint, first_seen, last_seen, count)
                 VALUES (?1, ?2, ?3, ?4, ?4, 1)",
                params![hostname, address, fingerprint, now],
            )?;
        }
        Ok(())
    }

    /// Persist the DER bytes of a certificate under `cert_cache/<fp>.crt`.
    pub fn write_blob(&self, fingerprint: &str, der: &[u8]) -> Result<(), TrustStoreError> {
        let path = self.blob_dir.join(format!("{fingerprint}.crt"));
        std::fs::write(path, der)?;
        Ok(())
    }

    pub fn blob_path(&self, fingerprint: &str) -> PathBuf {
        self.blob_dir.join(format!("{fingerprint}.crt"))
    }

    /// Read back a previously-written blob's DER bytes, if it is still on
    /// disk. Used to re-inspect the prior certificate's validity dates
    /// when reporting a TOFU mismatch.
    pub fn read_blob(&self, fingerprint: &str) -> Result<Option<Vec<u8>>, TrustStoreError> {
        let path = self.blob_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read(path)?))
    }
}

/// SHA-256 fingerprint of a DER-encoded certificate, hex-encoded.
pub fn fingerprint(der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(der);
    hex::encode(hasher.finalize())
}
