//! Error taxonomy for the request engine.
//!
//! One `thiserror`-derived enum per module boundary, composed into
//! [`EngineError`] via `#[from]` at the I/O seams, the same shape the
//! teacher crate uses for its per-module error enums.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the trust store (`crate::trust`).
#[derive(Debug, Error)]
pub enum TrustStoreError {
    #[error("trust store database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("could not read or write certificate cache directory: {0}")]
    Io(#[from] std::io::Error),

    #[error(
        "certificate for {host} has changed\nprevious fingerprint seen {prior_count} time(s): {old_fingerprint}\nnew fingerprint: {new_fingerprint}"
    )]
    FingerprintMismatch {
        host: String,
        old_fingerprint: String,
        new_fingerprint: String,
        prior_count: u32,
    },
}

/// Errors raised while generating or managing client identities (`crate::identity`).
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("certificate generation failed: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("could not read or write identity file: {0}")]
    Io(#[from] std::io::Error),

    #[error("no identity is currently active")]
    NoneActive,

    #[error("client certificate generation is disabled in restricted mode")]
    Restricted,
}

/// Errors raised by the bounded response cache (`crate::cache`).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry file missing on disk: {0}")]
    MissingFile(PathBuf),

    #[error("could not read or write cache file: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while rendering a text/gemini body (`crate::render`).
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid link target on line {line}: {source}")]
    BadLink {
        line: usize,
        #[source]
        source: crate::url::UrlError,
    },

    #[error("could not write rendered output: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error returned by the request engine, covering every kind
/// named in the engine's error-handling design: resolution, connection,
/// TLS, certificate, protocol, server failure, redirect, user abort, and
/// restricted-mode violations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not resolve host {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    Cert(#[from] TrustStoreError),

    #[error("malformed response from server: {0}")]
    Protocol(String),

    #[error("certificate validation failed for {host}: {reason}")]
    CertValidation { host: String, reason: String },

    #[error("server reported failure ({status}): {meta}")]
    ServerFailure { status: u8, meta: String },

    #[error("redirect rejected: {0}")]
    Redirect(RedirectReason),

    #[error("user declined to proceed")]
    UserAbort,

    #[error("operation not permitted in restricted mode: {0}")]
    Restricted(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] crate::url::UrlError),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Why a redirect was rejected outright (distinct from a user declining
/// one that was otherwise permitted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RedirectReason {
    #[error("server redirected a request to itself")]
    SelfRedirect,
    #[error("redirect would revisit a URL already seen in this chain")]
    Loop,
    #[error("redirect chain exceeded the maximum of 5 hops")]
    TooManyHops,
}
