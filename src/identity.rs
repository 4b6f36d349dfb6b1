//! Client certificate identity lifecycle: transient (generated here, with
//! a one-day validity window) and persistent (provisioned externally,
//! loaded and activated here).
//!
//! Grounded in `av98.py`'s `_activate_client_cert`/`_deactivate_client_cert`/
//! `_generate_transient_cert_cert`; the rcgen call sequence follows
//! `examples/Losses-rune/discovery/src/ssl.rs` (explicit `CertificateParams`
//! with `not_before`/`not_after`) combined with the simpler key-generation
//! idiom in `examples/AndrewAltimit-oasis-os`'s `tls_rustls.rs`
//! (`rcgen::generate_simple_self_signed`, no extra `rsa` dependency).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use time::{Duration as TimeDuration, OffsetDateTime};

use crate::error::IdentityError;

/// An identity available to present to a server: a certificate/key pair
/// plus the set of hosts it has already been shown to.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub name: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub transient: bool,
    pub domains_shown_to: HashSet<String>,
}

impl ClientIdentity {
    pub fn new(name: impl Into<String>, cert_path: PathBuf, key_path: PathBuf, transient: bool) -> Self {
        Self {
            name: name.into(),
            cert_path,
            key_path,
            transient,
            domains_shown_to: HashSet::new(),
        }
    }

    pub fn note_shown_to(&mut self, host: &str) {
        self.domains_shown_to.insert(host.to_string());
    }

    pub fn has_been_shown_to(&self, host: &str) -> bool {
        self.domains_shown_to.contains(host)
    }
}

/// A lightweight reference to an identity's file locations and name,
/// independent of its lifetime — the session's half of the two-mapping
/// split described in SPEC_FULL.md §9: `last_identity_per_host` owns one
/// of these per host, while `domains_shown_to` is owned by the active
/// [`ClientIdentity`] itself. Neither owns the identity outright.
#[derive(Debug, Clone)]
pub struct IdentityRef {
    pub name: String,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub transient: bool,
}

impl From<&ClientIdentity> for IdentityRef {
    fn from(identity: &ClientIdentity) -> Self {
        Self {
            name: identity.name.clone(),
            cert_path: identity.cert_path.clone(),
            key_path: identity.key_path.clone(),
            transient: identity.transient,
        }
    }
}

/// Owns the currently active identity, if any, and generates transient
/// identities on demand.
#[derive(Default)]
pub struct IdentityManager {
    active: Option<ClientIdentity>,
}

impl IdentityManager {
    pub fn new() -> Self {
        Self { active: None }
    }

    pub fn active(&self) -> Option<&ClientIdentity> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut ClientIdentity> {
        self.active.as_mut()
    }

    /// Activate an identity by its file locations and transient flag,
    /// clearing `domains_shown_to`. Grounded in §4.3a's
    /// `activate(cert_path, key_path, transient)` — used for the
    /// re-activation offer, where the identity being restored may itself
    /// be transient.
    pub fn activate(&mut self, name: impl Into<String>, cert_path: PathBuf, key_path: PathBuf, transient: bool) {
        self.active = Some(ClientIdentity::new(name, cert_path, key_path, transient));
    }

    /// Deactivate the current identity. If it was transient, its files
    /// are deleted from disk — transient identities do not outlive their
    /// activation window.
    pub fn deactivate(&mut self) -> Result<(), IdentityError> {
        if let Some(identity) = self.active.take() {
            if identity.transient {
                delete_identity_files(&identity)?;
            }
        }
        Ok(())
    }

    /// Generate a fresh self-signed certificate valid for one day, write
    /// it to `dir`, and activate it. Refuses in restricted mode, matching
    /// the Non-goal that disk-writing/cert-generating commands are
    /// disabled there.
    pub fn generate_transient(&mut self, dir: &Path, restricted: bool) -> Result<&ClientIdentity, IdentityError> {
        if restricted {
            return Err(IdentityError::Restricted);
        }
        std::fs::create_dir_all(dir)?;
        let name = format!("transient-{}", uuid_like());

        let mut params = CertificateParams::new(vec![name.clone()])?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, name.clone());
        params.distinguished_name = dn;
        let now = OffsetDateTime::now_utc();
        params.not_before = now - TimeDuration::minutes(5);
        params.not_after = now + TimeDuration::days(1);

        let key_pair = KeyPair::generate()?;
        let cert = params.self_signed(&key_pair)?;

        let cert_path = dir.join(format!("{name}.crt"));
        let key_path = dir.join(format!("{name}.key"));
        std::fs::write(&cert_path, cert.pem())?;
        std::fs::write(&key_path, key_pair.serialize_pem())?;

        self.active = Some(ClientIdentity::new(name, cert_path, key_path, true));
        Ok(self.active.as_ref().unwrap())
    }
}

fn delete_identity_files(identity: &ClientIdentity) -> Result<(), IdentityError> {
    if identity.cert_path.exists() {
        std::fs::remove_file(&identity.cert_path)?;
    }
    if identity.key_path.exists() {
        std::fs::remove_file(&identity.key_path)?;
    }
    Ok(())
}

/// A lightweight, dependency-free stand-in for a UUID, good enough to
/// avoid filename collisions between transient identities in one run.
fn uuid_like() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{nanos:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_transient_writes_files_and_activates() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = IdentityManager::new();
        let identity = mgr.generate_transient(dir.path(), false).unwrap();
        assert!(identity.cert_path.exists());
        assert!(identity.key_path.exists());
        assert!(identity.transient);
    }

    #[test]
    fn generate_transient_refuses_in_restricted_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = IdentityManager::new();
        let result = mgr.generate_transient(dir.path(), true);
        assert!(matches!(result, Err(IdentityError::Restricted)));
    }

    #[test]
    fn deactivate_deletes_transient_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = IdentityManager::new();
        let (cert_path, key_path) = {
            let identity = mgr.generate_transient(dir.path(), false).unwrap();
            (identity.cert_path.clone(), identity.key_path.clone())
        };
        mgr.deactivate().unwrap();
        assert!(!cert_path.exists());
        assert!(!key_path.exists());
        assert!(mgr.active().is_none());
    }

    #[test]
    fn deactivate_persistent_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("id.crt");
        let key_path = dir.path().join("id.key");
        std::fs::write(&cert_path, b"cert").unwrap();
        std::fs::write(&key_path, b"key").unwrap();

        let mut mgr = IdentityManager::new();
        mgr.activate("id", cert_path.clone(), key_path.clone(), false);
        mgr.deactivate().unwrap();
        assert!(cert_path.exists());
        assert!(key_path.exists());
    }

    #[test]
    fn domain_tracking() {
        let mut identity = ClientIdentity::new("id", PathBuf::new(), PathBuf::new(), false);
        assert!(!identity.has_been_shown_to("a.example"));
        identity.note_shown_to("a.example");
        assert!(identity.has_been_shown_to("a.example"));
    }
}
