//! URL model for Gemini (and Gopher/local-file/other) resource references.
//!
//! Wraps [`url::Url`] with the handful of Gemini-specific behaviors that
//! generic URL parsing doesn't give for free: default-port elision, a
//! `root`/`parent`/`query` vocabulary mirroring `av98.py`'s `GeminiItem`,
//! and best-effort bracketing of raw IPv6 literals typed without brackets.

use thiserror::Error;

/// Default port for a scheme that Gemini clients commonly dial; other
/// schemes fall back to whatever `url::Url` reports (or are routed
/// elsewhere by the engine before a port is ever needed).
fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "gemini" => Some(1965),
        "gopher" => Some(70),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("could not parse URL '{0}': {1}")]
    Parse(String, url::ParseError),
    #[error("URL has no host: {0}")]
    NoHost(String),
    #[error("could not resolve '{relative}' against base '{base}'")]
    Resolve { base: String, relative: String },
}

/// A parsed Gemini (or Gopher/file/other-scheme) resource reference.
///
/// The optional `name` carries a link's display text when the reference
/// was produced while parsing a `=>` line; it plays no role in equality
/// or formatting of the URL itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiUrl {
    inner: url::Url,
    pub name: Option<String>,
}

impl GeminiUrl {
    /// Parse `raw`, defaulting a missing scheme to `gemini://` and
    /// bracketing a raw IPv6 literal host first if one is detected.
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let candidate = bracket_raw_ipv6(raw);
        let with_scheme = if candidate.contains("://") {
            candidate
        } else {
            format!("gemini://{candidate}")
        };
        let inner =
            url::Url::parse(&with_scheme).map_err(|e| UrlError::Parse(raw.to_string(), e))?;
        if inner.scheme() != "local-file" && inner.host_str().is_none() {
            return Err(UrlError::NoHost(raw.to_string()));
        }
        Ok(Self { inner, name: None })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn scheme(&self) -> &str {
        self.inner.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.inner.host_str()
    }

    /// The port, with the scheme's default substituted when unspecified.
    pub fn port(&self) -> Option<u16> {
        self.inner.port().or_else(|| default_port(self.scheme()))
    }

    pub fn path(&self) -> &str {
        self.inner.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.inner.query()
    }

    /// `host:port`, used as the key into the trust store and the
    /// in-process connection cache.
    pub fn host_port(&self) -> Option<String> {
        Some(format!("{}:{}", self.host()?, self.port()?))
    }

    /// The root of this URL: same scheme/host/port, path "/", no query.
    pub fn root(&self) -> Self {
        let mut inner = self.inner.clone();
        inner.set_path("/");
        inner.set_query(None);
        Self { inner, name: None }
    }

    /// One directory up from this URL's path. Returns a clone unchanged
    /// if the path is already at "/" or a single segment.
    pub fn parent(&self) -> Self {
        let trimmed = self.path().trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let mut inner = self.inner.clone();
        inner.set_query(None);
        if segments.len() <= 1 {
            inner.set_path("/");
        } else {
            let parent_path = format!("/{}/", segments[..segments.len() - 1].join("/"));
            inner.set_path(&parent_path);
        }
        Self { inner, name: None }
    }

    /// This URL with its query replaced (the path is preserved).
    pub fn with_query(&self, query: &str) -> Self {
        let mut inner = self.inner.clone();
        inner.set_query(Some(query));
        Self {
            inner,
            name: self.name.clone(),
        }
    }

    /// Resolve `relative` against `self` as the base, Gemini-style:
    /// absolute URLs (with a scheme) pass through unchanged, everything
    /// else is resolved via standard relative-reference rules.
    pub fn absolutize(&self, relative: &str) -> Result<Self, UrlError> {
        if relative.contains("://") {
            return Self::parse(relative);
        }
        let joined = self
            .inner
            .join(relative)
            .map_err(|_| UrlError::Resolve {
                base: self.inner.to_string(),
                relative: relative.to_string(),
            })?;
        Ok(Self {
            inner: joined,
            name: None,
        })
    }

    /// Render as a string, eliding the port when it matches the
    /// scheme's default.
    pub fn as_str(&self) -> String {
        if self.inner.port().is_some() && self.inner.port() == default_port(self.scheme()) {
            let mut stripped = self.inner.clone();
            let _ = stripped.set_port(None);
            stripped.to_string()
        } else {
            self.inner.to_string()
        }
    }
}

impl std::fmt::Display for GeminiUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Best-effort bracketing of a raw IPv6 literal: if `raw`'s host-ish
/// prefix contains more than two colons and isn't already bracketed,
/// wrap it in `[...]` the way `av98.py`'s `fix_ipv6_url` does
/// (`url.count(":") > 2`). A bare literal with exactly two colons (e.g.
/// `::1`) doesn't meet that count but is still unambiguously an IPv6
/// address rather than a host:port pair, so it's bracketed too whenever
/// it parses as one.
fn bracket_raw_ipv6(raw: &str) -> String {
    let (scheme_prefix, rest) = match raw.split_once("://") {
        Some((s, r)) => (format!("{s}://"), r),
        None => (String::new(), raw),
    };
    if rest.starts_with('[') {
        return raw.to_string();
    }
    let (authority, remainder) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let looks_bare_ipv6 = authority.matches(':').count() >= 3
        || authority.parse::<std::net::Ipv6Addr>().is_ok();
    if looks_bare_ipv6 {
        format!("{scheme_prefix}[{authority}]{remainder}")
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_elided_in_format() {
        let u = GeminiUrl::parse("gemini://example.com:1965/page").unwrap();
        assert_eq!(u.as_str(), "gemini://example.com/page");
    }

    #[test]
    fn non_default_port_kept() {
        let u = GeminiUrl::parse("gemini://example.com:1970/page").unwrap();
        assert_eq!(u.as_str(), "gemini://example.com:1970/page");
    }

    #[test]
    fn roundtrip_parse_format() {
        let u = GeminiUrl::parse("gemini://example.com/a/b?q=1").unwrap();
        let again = GeminiUrl::parse(&u.as_str()).unwrap();
        assert_eq!(u.as_str(), again.as_str());
    }

    #[test]
    fn missing_scheme_defaults_to_gemini() {
        let u = GeminiUrl::parse("example.com/page").unwrap();
        assert_eq!(u.scheme(), "gemini");
    }

    #[test]
    fn root_clears_path_and_query() {
        let u = GeminiUrl::parse("gemini://example.com/a/b?q=1").unwrap();
        assert_eq!(u.root().as_str(), "gemini://example.com/");
    }

    #[test]
    fn parent_pops_one_segment() {
        let u = GeminiUrl::parse("gemini://example.com/a/b").unwrap();
        assert_eq!(u.parent().as_str(), "gemini://example.com/a/");
    }

    #[test]
    fn parent_of_single_segment_is_unchanged() {
        let u = GeminiUrl::parse("gemini://example.com/a").unwrap();
        assert_eq!(u.parent().as_str(), "gemini://example.com/");
    }

    #[test]
    fn with_query_preserves_path() {
        let u = GeminiUrl::parse("gemini://example.com/search").unwrap();
        assert_eq!(u.with_query("cats").as_str(), "gemini://example.com/search?cats");
    }

    #[test]
    fn absolutize_relative_sibling() {
        let base = GeminiUrl::parse("gemini://example.com/dir/page").unwrap();
        let resolved = base.absolutize("other.gmi").unwrap();
        assert_eq!(resolved.as_str(), "gemini://example.com/dir/other.gmi");
    }

    #[test]
    fn absolutize_parent_relative() {
        let base = GeminiUrl::parse("gemini://example.com/dir/page").unwrap();
        let resolved = base.absolutize("../other.gmi").unwrap();
        assert_eq!(resolved.as_str(), "gemini://example.com/other.gmi");
    }

    #[test]
    fn absolutize_absolute_passthrough() {
        let base = GeminiUrl::parse("gemini://example.com/page").unwrap();
        let resolved = base.absolutize("https://web.example/x").unwrap();
        assert_eq!(resolved.as_str(), "https://web.example/x");
    }

    #[test]
    fn raw_ipv6_literal_gets_bracketed() {
        let u = GeminiUrl::parse("::1").unwrap();
        assert_eq!(u.host(), Some("::1"));
    }

    #[test]
    fn already_bracketed_ipv6_untouched() {
        let u = GeminiUrl::parse("gemini://[::1]/foo").unwrap();
        assert_eq!(u.as_str(), "gemini://[::1]/foo");
    }

    #[test]
    fn host_port_formats_as_expected() {
        let u = GeminiUrl::parse("gemini://example.com/page").unwrap();
        assert_eq!(u.host_port().as_deref(), Some("example.com:1965"));
    }
}
