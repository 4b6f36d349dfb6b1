//! Engine-wide options, supplied by the caller on every fetch.
//!
//! Mirrors `av98.py`'s `self.options` dict. The core never loads these
//! from a configuration file — that remains the surrounding shell's job —
//! it only consumes a plain value type handed to it.

use std::path::PathBuf;
use std::time::Duration;

/// Whether the TLS transport pins certificates (trust-on-first-use) or
/// validates against the system's CA roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    Tofu,
    Ca,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Prefer IPv6 addresses when resolving a host.
    pub ipv6: bool,
    /// Applied to both the TCP connect and every subsequent read.
    pub timeout: Duration,
    /// Column width the document renderer wraps plain text and bullets to.
    pub render_width: usize,
    /// Follow 3x redirects without prompting, subject to the same-host
    /// same-scheme and hop-count rules.
    pub auto_follow_redirects: bool,
    /// A configured Gopher proxy; absent means Gopher requests fail with
    /// an explanatory message instead of being dialed directly.
    pub gopher_proxy: Option<(String, u16)>,
    pub tls_mode: TlsMode,
    /// Disables disk-writing and shell-executing operations, including
    /// client certificate generation.
    pub restricted: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            ipv6: true,
            timeout: Duration::from_secs(10),
            render_width: 80,
            auto_follow_redirects: true,
            gopher_proxy: None,
            tls_mode: TlsMode::default(),
            restricted: false,
        }
    }
}

/// The per-user directory the core persists the trust store, certificate
/// caches and client identities under: `~/.av98/` if it already exists
/// (an established install), else `~/.config/av98/` if that already
/// exists, else `~/.config/av98/` is created fresh. Resolved once and
/// handed to `TrustStore::open`/`IdentityManager` by the caller.
pub fn state_dir() -> std::io::Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        let legacy = home.join(".av98");
        if legacy.is_dir() {
            return Ok(legacy);
        }
    }
    let config = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("av98");
    if !config.is_dir() {
        std::fs::create_dir_all(&config)?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_spec() {
        let opts = EngineOptions::default();
        assert!(opts.ipv6);
        assert_eq!(opts.timeout, Duration::from_secs(10));
        assert_eq!(opts.render_width, 80);
        assert!(opts.auto_follow_redirects);
        assert!(opts.gopher_proxy.is_none());
        assert_eq!(opts.tls_mode, TlsMode::Tofu);
        assert!(!opts.restricted);
    }
}
