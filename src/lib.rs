//! `gemini-core`: the request engine at the heart of an interactive
//! Gemini protocol client — TOFU-pinned TLS, the 1x/2x/3x/4x/5x/6x status
//! machine, a text/gemini renderer, and the session/identity/cache state
//! that the surrounding REPL shell (out of scope here) drives.
//!
//! Callers are expected to call [`init`] once at process start, the way
//! the teacher crate's `run()` calls `env_logger::init()` before doing
//! anything else.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod interaction;
pub mod render;
pub mod session;
pub mod tls;
pub mod trust;
pub mod url;

pub use cache::ResponseCache;
pub use config::{EngineOptions, TlsMode};
pub use engine::{FetchBody, FetchOptions, FetchOutcome, FetchResult, RequestEngine};
pub use error::{CacheError, EngineError, IdentityError, RedirectReason, RenderError, TrustStoreError};
pub use identity::{ClientIdentity, IdentityManager, IdentityRef};
pub use interaction::{CertChallengeChoice, UserInteraction};
pub use render::{LinkItem, RenderedPage};
pub use session::{History, SessionState};
pub use trust::TrustStore;
pub use url::GeminiUrl;

/// One-time process setup: initializes the `log`/`env_logger` facade and,
/// on Unix, narrows the process umask to owner-only (0o077) so that
/// certificate, key, and cache files this crate writes are never group-
/// or world-readable, per §5's file-permissions requirement. Mirrors
/// `av98.py`'s explicit `os.umask(0o077)` call at startup.
pub fn init() {
    let _ = env_logger::try_init();
    restrict_umask();
}

#[cfg(unix)]
fn restrict_umask() {
    // SAFETY: `umask` only reads/writes the calling process's file-mode
    // creation mask; it takes no pointers and has no other preconditions.
    unsafe {
        libc::umask(0o077);
    }
}

#[cfg(not(unix))]
fn restrict_umask() {}
