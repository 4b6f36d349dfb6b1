//! The request engine: drives one logical Gemini request to completion,
//! including the iterative restart on 1x/3x/6x statuses, TOFU validation,
//! client-identity preflight, redirect bookkeeping, body decoding, caching,
//! history, and document rendering.
//!
//! Grounded in the teacher's `GeminiClient::fetch`/`fetch_single` for the
//! overall connect-read-dispatch shape, reworked from recursion into the
//! iterative loop SPEC_FULL.md §9 calls for, and in `av98.py`'s
//! `_get_response`/`_handle_status`/`_activate_client_cert` for the
//! pre-flight identity rules, redirect rules, and body-phase decoding that
//! the teacher's simpler client never implemented.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::cache::ResponseCache;
use crate::config::{EngineOptions, TlsMode};
use crate::error::{EngineError, RedirectReason, TrustStoreError};
use crate::identity::{IdentityManager, IdentityRef};
use crate::interaction::{CertChallengeChoice, UserInteraction};
use crate::render::{self, LinkItem, RenderedPage};
use crate::session::SessionState;
use crate::tls::{self, Connected};
use crate::trust::{self, TrustStore, Verdict};
use crate::url::GeminiUrl;

/// Per-fetch opt-outs the caller may request, per §4.4's top-level
/// contract ("caller may opt out of caching, of history updating, and of
/// handler dispatch").
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub use_cache: bool,
    pub update_history: bool,
    pub dispatch: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            update_history: true,
            dispatch: true,
        }
    }
}

/// A response body, decoded per its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchBody {
    Text(String),
    Binary(Vec<u8>),
}

/// A completed fetch: the final (post-redirect) resource reference, its
/// MIME type, decoded body, the on-disk path it was persisted to, and —
/// for a `text/gemini` body with dispatch enabled — the rendered page.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub url: GeminiUrl,
    pub mime: String,
    pub body: FetchBody,
    pub path: PathBuf,
    pub page: Option<RenderedPage>,
}

/// The outcome of [`RequestEngine::fetch`]: either a completed fetch, or
/// an http(s) URL the caller should hand to the host OS's default browser
/// (the one non-error, non-`FetchOutcome` result named in §4.4's
/// cross-scheme routing).
#[derive(Debug, Clone)]
pub enum FetchResult {
    Fetched(FetchOutcome),
    DelegatedToBrowser(GeminiUrl),
}

/// Owns every piece of state a session needs across fetches: options, the
/// trust store, the active/available client identities, the response
/// cache, and the session's navigation state. Generic over the
/// [`UserInteraction`] implementation so the engine never assumes a REPL.
pub struct RequestEngine<I: UserInteraction> {
    options: EngineOptions,
    trust: TrustStore,
    identities: IdentityManager,
    cache: ResponseCache,
    session: SessionState,
    state_dir: PathBuf,
    interaction: I,
    /// Set for exactly one subsequent preflight check after a 6x
    /// challenge activates an identity for `host`, so the cross-domain
    /// guard doesn't immediately ask to deactivate the identity it was
    /// just asked to present.
    fresh_identity_host: Option<String>,
    /// The link index from the most recently rendered `text/gemini` page
    /// — the navigation lookup table named in §6's REPL contract.
    pub lookup_index: Vec<LinkItem>,
}

impl<I: UserInteraction> RequestEngine<I> {
    pub fn new(options: EngineOptions, trust: TrustStore, identities: IdentityManager, state_dir: PathBuf, interaction: I) -> Self {
        Self {
            options,
            trust,
            identities,
            cache: ResponseCache::new(),
            session: SessionState::new(),
            state_dir,
            interaction,
            fresh_identity_host: None,
            lookup_index: Vec::new(),
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionState {
        &mut self.session
    }

    pub fn cache_mut(&mut self) -> &mut ResponseCache {
        &mut self.cache
    }

    pub fn identities(&self) -> &IdentityManager {
        &self.identities
    }

    /// Drive `target` to completion: cross-scheme routing, the
    /// permanent-redirect shortcut, client-identity preflight, connect,
    /// and the full 1x/2x/3x/4x/5x/6x status dispatch, restarting
    /// in-loop rather than recursing.
    pub fn fetch(&mut self, target: GeminiUrl, opts: FetchOptions) -> Result<FetchResult, EngineError> {
        let mut current = target;
        let mut continuing_3x = false;

        loop {
            match current.scheme() {
                "http" | "https" => return Ok(FetchResult::DelegatedToBrowser(current)),
                "gopher" if self.options.gopher_proxy.is_none() => {
                    return Err(EngineError::UnsupportedScheme(
                        "gopher requires a configured proxy (set gopher_proxy host:port)".into(),
                    ));
                }
                "gopher" => {}
                "local-file" => return self.fetch_local_file(&current, &opts).map(FetchResult::Fetched),
                "gemini" => {}
                other => return Err(EngineError::UnsupportedScheme(other.to_string())),
            }

            if let Some(dest) = self.session.permanent_redirect_target(&current).cloned() {
                let dest = match current.name.clone() {
                    Some(name) => dest.with_name(name),
                    None => dest,
                };
                info!("engine: {current} has a permanent redirect on file, going straight to {dest}");
                current = dest;
                continue;
            }

            self.session.reset_redirect_chain(continuing_3x);
            continuing_3x = false;

            // A Gopher request is dialed to the configured proxy's address,
            // not the URL's own host — the proxy speaks Gemini/TLS and is
            // handed the full gopher:// URL as its request line, mirroring
            // `av98.py`'s `_send_request` gopher branch.
            let (host, port) = if current.scheme() == "gopher" {
                self.options
                    .gopher_proxy
                    .clone()
                    .expect("gopher without a configured proxy already returned above")
            } else {
                let host = current
                    .host()
                    .ok_or_else(|| EngineError::Protocol(format!("{current} has no host")))?
                    .to_string();
                let port = current.port().unwrap_or(1965);
                (host, port)
            };

            self.preflight_identity(&host)?;

            info!("engine: connecting to {host}:{port}");
            let identity = self.identities.active().cloned();
            let mut connected = tls::connect(
                &host,
                port,
                self.options.tls_mode,
                self.options.ipv6,
                self.options.timeout,
                identity.as_ref(),
            )?;

            if let Some(der) = connected.peer_der.clone() {
                if self.options.tls_mode == TlsMode::Tofu {
                    tls::validate_tofu_cert(&der, &host)?;
                }
                self.handle_tofu(&host, &connected.address, &der)?;
            }

            if let Some(active) = self.identities.active_mut() {
                if !active.has_been_shown_to(&host) {
                    active.note_shown_to(&host);
                    self.session
                        .last_identity_per_host
                        .insert(host.clone(), IdentityRef::from(&*active));
                }
            }

            connected.send_request(&current.as_str())?;
            let header_line = connected.read_header_line()?;
            let (status, meta) = parse_header(&header_line)?;
            debug!("engine: {host} responded {status} {meta:?}");

            match status / 10 {
                1 => {
                    let sensitive = status == 11;
                    let input = self
                        .interaction
                        .prompt_input(&meta, sensitive)
                        .ok_or(EngineError::UserAbort)?;
                    current = current.with_query(&input);
                    continue;
                }
                2 => {
                    let outcome = self.finish_success(&current, &meta, &mut connected, &opts)?;
                    return Ok(FetchResult::Fetched(outcome));
                }
                3 => {
                    let permanent = status == 31;
                    let destination = current.absolutize(meta.trim())?;
                    self.evaluate_redirect(&current, &destination)?;
                    if permanent {
                        self.session.record_permanent_redirect(&current, destination.clone());
                    }
                    self.session.redirect_chain.insert(current.as_str());
                    info!("engine: {status} redirect {current} -> {destination}");
                    current = destination;
                    continuing_3x = true;
                    continue;
                }
                4 | 5 => return Err(EngineError::ServerFailure { status, meta }),
                6 => {
                    self.handle_cert_challenge(status, &meta, &host)?;
                    continue;
                }
                _ => return Err(EngineError::Protocol(format!("unrecognized status class: {status}"))),
            }
        }
    }

    /// Deactivate any active transient identity, matching §4.4's "clean
    /// engine shutdown deactivates any active transient identity".
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        if matches!(self.identities.active(), Some(id) if id.transient) {
            self.identities.deactivate()?;
        }
        self.session.idx_filename = None;
        self.session.tmp_filename = None;
        Ok(())
    }

    /// Cross-domain deactivation guard and re-activation offer, run
    /// before every connect attempt.
    fn preflight_identity(&mut self, host: &str) -> Result<(), EngineError> {
        if let Some(active) = self.identities.active() {
            let just_activated_for_this_host = self.fresh_identity_host.as_deref() == Some(host);
            if !active.has_been_shown_to(host) && !just_activated_for_this_host {
                let transient = active.transient;
                if !self.interaction.confirm_cross_domain_deactivation(host, transient) {
                    return Err(EngineError::UserAbort);
                }
                self.identities.deactivate()?;
            }
        }
        self.fresh_identity_host = None;

        if self.identities.active().is_none() {
            if let Some(last) = self.session.last_identity_per_host.get(host).cloned() {
                if self.interaction.offer_reactivation(host, &last.name) {
                    self.identities
                        .activate(last.name.clone(), last.cert_path.clone(), last.key_path.clone(), last.transient);
                } else {
                    self.session.last_identity_per_host.remove(host);
                }
            }
        }
        Ok(())
    }

    /// Redirect-chain bookkeeping and confirmation, run before a 3x
    /// restart. Does not itself mutate the chain — the caller inserts the
    /// source URL once this returns `Ok`.
    fn evaluate_redirect(&mut self, from: &GeminiUrl, to: &GeminiUrl) -> Result<(), EngineError> {
        if to.as_str() == from.as_str() {
            return Err(EngineError::Redirect(RedirectReason::SelfRedirect));
        }
        if self.session.redirect_chain.contains(&to.as_str()) {
            return Err(EngineError::Redirect(RedirectReason::Loop));
        }
        if self.session.redirect_chain.len() >= 5 {
            return Err(EngineError::Redirect(RedirectReason::TooManyHops));
        }
        let cross_host = from.host() != to.host();
        let cross_scheme = from.scheme() != to.scheme();
        if cross_host || cross_scheme || !self.options.auto_follow_redirects {
            let proceed = self.interaction.confirm_redirect(&from.as_str(), &to.as_str(), cross_host, cross_scheme);
            if !proceed {
                return Err(EngineError::UserAbort);
            }
        }
        Ok(())
    }

    /// TOFU verdict handling: first contact and a match both pin/refresh
    /// silently; a mismatch is put to the user, who may accept (pinning
    /// an additional row) or reject (a certificate error, nothing
    /// written). Runs in CA mode too, per §4.3's "in either mode, the
    /// fingerprint is computed and passed to the trust store" — only the
    /// date/hostname inspection in [`tls::validate_tofu_cert`] is TOFU-only.
    fn handle_tofu(&mut self, host: &str, address: &str, der: &[u8]) -> Result<(), EngineError> {
        let fp = trust::fingerprint(der);
        let verdict = self.trust.check(host, address, &fp).map_err(EngineError::Cert)?;
        match verdict {
            Verdict::FirstContact | Verdict::Matched => {
                self.trust.write_blob(&fp, der).map_err(EngineError::Cert)?;
                self.record_fingerprint(host, address, &fp)
            }
            Verdict::Mismatch { prior_count } => {
                let rows = self.trust.lookup(host, address).map_err(EngineError::Cert)?;
                let old_fingerprint = rows
                    .iter()
                    .max_by_key(|r| r.count)
                    .map(|r| r.fingerprint.clone())
                    .unwrap_or_default();
                let prior_expired = self.prior_cert_expired(&old_fingerprint);
                let accept = self
                    .interaction
                    .confirm_tofu_mismatch(host, &old_fingerprint, &fp, prior_count, prior_expired);
                if !accept {
                    return Err(EngineError::Cert(TrustStoreError::FingerprintMismatch {
                        host: host.to_string(),
                        old_fingerprint,
                        new_fingerprint: fp,
                        prior_count,
                    }));
                }
                self.trust.write_blob(&fp, der).map_err(EngineError::Cert)?;
                self.record_fingerprint(host, address, &fp)
            }
        }
    }

    fn record_fingerprint(&self, host: &str, address: &str, fingerprint: &str) -> Result<(), EngineError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.trust.record(host, address, fingerprint, now).map_err(EngineError::Cert)
    }

    /// Whether the previously-pinned certificate under `fingerprint` has
    /// expired, if its blob is still on disk and parses. `None` when
    /// either is unavailable, matching §4.2's "if crypto inspection is
    /// available" qualifier.
    fn prior_cert_expired(&self, fingerprint: &str) -> Option<bool> {
        let der = self.trust.read_blob(fingerprint).ok().flatten()?;
        let (_, cert) = x509_parser::parse_x509_certificate(&der).ok()?;
        let now = x509_parser::time::ASN1Time::now();
        Some(now > cert.validity().not_after)
    }

    /// 6x client-certificate-required handling. A hard failure in
    /// restricted mode, per the Non-goal that cert-generating operations
    /// are disabled there.
    fn handle_cert_challenge(&mut self, status: u8, meta: &str, host: &str) -> Result<(), EngineError> {
        if self.options.restricted {
            return Err(EngineError::Restricted("client certificate challenge".into()));
        }
        match self.interaction.choose_cert_challenge(status, meta) {
            CertChallengeChoice::Abort => Err(EngineError::UserAbort),
            CertChallengeChoice::NewTransient => {
                let dir = self.state_dir.join("transient_certs");
                self.identities
                    .generate_transient(&dir, self.options.restricted)
                    .map_err(EngineError::Identity)?;
                self.fresh_identity_host = Some(host.to_string());
                Ok(())
            }
            // Generation of a persistent identity's key material is out
            // of scope (§1): both variants activate files that some
            // out-of-band process already placed under `client_certs/`.
            CertChallengeChoice::NewPersistent { name } | CertChallengeChoice::LoadStored { name } => {
                let dir = self.state_dir.join("client_certs");
                self.identities.activate(name.clone(), dir.join(format!("{name}.crt")), dir.join(format!("{name}.key")), false);
                self.fresh_identity_host = Some(host.to_string());
                Ok(())
            }
            CertChallengeChoice::LoadExternal { cert_path, key_path } => {
                let name = cert_path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("external")
                    .to_string();
                self.identities.activate(name, cert_path, key_path, false);
                self.fresh_identity_host = Some(host.to_string());
                Ok(())
            }
        }
    }

    /// Body-phase decoding, persistence, caching, history, and
    /// render-and-dispatch for a 2x response.
    fn finish_success(
        &mut self,
        url: &GeminiUrl,
        meta: &str,
        connected: &mut Connected,
        opts: &FetchOptions,
    ) -> Result<FetchOutcome, EngineError> {
        let (mime, charset) = parse_content_type(meta);
        let raw = connected.read_body()?;
        let path = self.write_temp_file(&raw, &mime, &charset)?;
        info!("engine: fetched {url} ({} bytes, {mime})", raw.len());

        let body = if mime.starts_with("text/") {
            let encoding = encoding_rs::Encoding::for_label(charset.as_bytes())
                .ok_or_else(|| EngineError::Protocol(format!("unsupported charset: {charset}")))?;
            let (decoded, _, _) = encoding.decode(&raw);
            FetchBody::Text(decoded.into_owned())
        } else {
            FetchBody::Binary(raw)
        };

        let page = if opts.dispatch && mime == "text/gemini" {
            if let FetchBody::Text(text) = &body {
                let rendered = render::render(text, url, self.options.render_width)?;
                self.lookup_index = rendered.links.clone();
                self.session.idx_filename = Some(self.write_rendered_file(&rendered.text)?);
                Some(rendered)
            } else {
                None
            }
        } else {
            None
        };

        if opts.use_cache {
            self.cache.put(&url.as_str(), &mime, path.clone()).map_err(EngineError::Cache)?;
        }
        if opts.update_history {
            self.session.history.push(url.clone());
        }
        self.session.tmp_filename = Some(path.clone());

        Ok(FetchOutcome {
            url: url.clone(),
            mime,
            body,
            path,
            page,
        })
    }

    /// Read a `local-file:` reference directly off disk. Deliberately
    /// never cached: the cache's eviction path unlinks files, which would
    /// destroy a real file the caller pointed at rather than a temp copy.
    fn fetch_local_file(&mut self, url: &GeminiUrl, opts: &FetchOptions) -> Result<FetchOutcome, EngineError> {
        let path = PathBuf::from(url.path());
        let raw = std::fs::read(&path)?;
        let mime = guess_local_mime(&path);

        let body = if mime.starts_with("text/") {
            FetchBody::Text(String::from_utf8_lossy(&raw).into_owned())
        } else {
            FetchBody::Binary(raw)
        };

        let page = if opts.dispatch && mime == "text/gemini" {
            if let FetchBody::Text(text) = &body {
                let rendered = render::render(text, url, self.options.render_width)?;
                self.lookup_index = rendered.links.clone();
                Some(rendered)
            } else {
                None
            }
        } else {
            None
        };

        if opts.update_history {
            self.session.history.push(url.clone());
        }

        Ok(FetchOutcome {
            url: url.clone(),
            mime,
            body,
            path,
            page,
        })
    }

    /// Persist a raw response body to a fresh temp file. Text bodies are
    /// decoded and re-encoded through their declared charset so the file
    /// on disk preserves that encoding rather than being silently
    /// normalized to UTF-8.
    fn write_temp_file(&self, raw: &[u8], mime: &str, charset: &str) -> Result<PathBuf, EngineError> {
        let dir = self.state_dir.join("tmp");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.raw", temp_file_stub()));
        if mime.starts_with("text/") {
            let encoding = encoding_rs::Encoding::for_label(charset.as_bytes())
                .ok_or_else(|| EngineError::Protocol(format!("unsupported charset: {charset}")))?;
            let (decoded, _, _) = encoding.decode(raw);
            let (reencoded, _, had_unmappable) = encoding.encode(&decoded);
            if had_unmappable {
                warn!("engine: some characters could not be re-encoded as {charset} while writing {}", path.display());
            }
            std::fs::write(&path, reencoded)?;
        } else {
            std::fs::write(&path, raw)?;
        }
        Ok(path)
    }

    fn write_rendered_file(&self, text: &str) -> Result<PathBuf, EngineError> {
        let dir = self.state_dir.join("tmp");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.gmi", temp_file_stub()));
        std::fs::write(&path, text)?;
        Ok(path)
    }
}

fn guess_local_mime(path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some("gmi") | Some("gemini") => "text/gemini".to_string(),
        Some("txt") => "text/plain".to_string(),
        Some("html") | Some("htm") => "text/html".to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

fn temp_file_stub() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("resp-{nanos:x}")
}

/// Parse a response header line into `(status, meta)`: exactly two ASCII
/// digits, an optional single space, then the meta string (≤1024 bytes).
fn parse_header(line: &str) -> Result<(u8, String), EngineError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.len() < 2 {
        return Err(EngineError::Protocol("response header shorter than a status code".into()));
    }
    let (status_str, rest) = trimmed.split_at(2);
    let status: u8 = status_str
        .parse()
        .map_err(|_| EngineError::Protocol(format!("invalid status code: {status_str:?}")))?;
    if !(10..=69).contains(&status) {
        return Err(EngineError::Protocol(format!("status code out of range: {status}")));
    }
    let meta = rest.strip_prefix(' ').unwrap_or(rest).to_string();
    if meta.len() > 1024 {
        return Err(EngineError::Protocol("meta exceeds 1024 bytes".into()));
    }
    Ok((status, meta))
}

/// Split `meta` into `(mime, charset)`, defaulting to
/// `text/gemini`/`utf-8` when empty, per §4.4's body-phase rules.
fn parse_content_type(meta: &str) -> (String, String) {
    if meta.trim().is_empty() {
        return ("text/gemini".to_string(), "utf-8".to_string());
    }
    let mut parts = meta.split(';');
    let mime = parts.next().unwrap_or("text/gemini").trim().to_string();
    let mut charset = "utf-8".to_string();
    for param in parts {
        if let Some(value) = param.trim().strip_prefix("charset=") {
            charset = value.trim_matches('"').to_string();
        }
    }
    (mime, charset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::test_support::ScriptedInteraction;

    fn engine(interaction: ScriptedInteraction) -> (RequestEngine<ScriptedInteraction>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let trust = TrustStore::open(&dir.path().join("tofu.db"), dir.path().join("cert_cache")).unwrap();
        let engine = RequestEngine::new(
            EngineOptions::default(),
            trust,
            IdentityManager::new(),
            dir.path().to_path_buf(),
            interaction,
        );
        (engine, dir)
    }

    fn u(s: &str) -> GeminiUrl {
        GeminiUrl::parse(s).unwrap()
    }

    #[test]
    fn parse_header_splits_status_and_meta() {
        assert_eq!(parse_header("20 text/gemini\r\n").unwrap(), (20, "text/gemini".to_string()));
        assert_eq!(parse_header("10 Search?\r\n").unwrap(), (10, "Search?".to_string()));
    }

    #[test]
    fn parse_header_allows_empty_meta() {
        assert_eq!(parse_header("20\r\n").unwrap(), (20, String::new()));
    }

    #[test]
    fn parse_header_rejects_short_or_out_of_range() {
        assert!(parse_header("X").is_err());
        assert!(parse_header("99 nope\r\n").is_err());
    }

    #[test]
    fn parse_content_type_defaults_when_empty() {
        assert_eq!(parse_content_type(""), ("text/gemini".to_string(), "utf-8".to_string()));
    }

    #[test]
    fn parse_content_type_reads_charset_param() {
        let (mime, charset) = parse_content_type("text/plain; charset=iso-8859-1");
        assert_eq!(mime, "text/plain");
        assert_eq!(charset, "iso-8859-1");
    }

    #[test]
    fn evaluate_redirect_rejects_self_redirect() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        let from = u("gemini://a.example/x");
        let result = engine.evaluate_redirect(&from, &from);
        assert!(matches!(result, Err(EngineError::Redirect(RedirectReason::SelfRedirect))));
    }

    #[test]
    fn evaluate_redirect_rejects_loop() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        let a = u("gemini://a.example/");
        let b = u("gemini://a.example/b");
        engine.session_mut().redirect_chain.insert(b.as_str());
        let result = engine.evaluate_redirect(&a, &b);
        assert!(matches!(result, Err(EngineError::Redirect(RedirectReason::Loop))));
    }

    #[test]
    fn evaluate_redirect_rejects_too_many_hops() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        for i in 0..5 {
            engine.session_mut().redirect_chain.insert(format!("gemini://a.example/{i}"));
        }
        let from = u("gemini://a.example/from");
        let to = u("gemini://a.example/new-target");
        let result = engine.evaluate_redirect(&from, &to);
        assert!(matches!(result, Err(EngineError::Redirect(RedirectReason::TooManyHops))));
    }

    #[test]
    fn evaluate_redirect_asks_on_cross_host_and_honors_decline() {
        let mut interaction = ScriptedInteraction::default();
        interaction.redirects.push_back(false);
        let (mut engine, _dir) = engine(interaction);
        let from = u("gemini://a.example/x");
        let to = u("gemini://b.example/y");
        let result = engine.evaluate_redirect(&from, &to);
        assert!(matches!(result, Err(EngineError::UserAbort)));
    }

    #[test]
    fn evaluate_redirect_same_host_same_scheme_skips_prompt() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        let from = u("gemini://a.example/x");
        let to = u("gemini://a.example/y");
        assert!(engine.evaluate_redirect(&from, &to).is_ok());
    }

    #[test]
    fn handle_tofu_first_contact_then_match_is_silent() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        let der = b"fake-der-bytes";
        engine.handle_tofu("a.example", "1.2.3.4:1965", der).unwrap();
        engine.handle_tofu("a.example", "1.2.3.4:1965", der).unwrap();
        let rows = engine.trust.lookup("a.example", "1.2.3.4:1965").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].count, 2);
    }

    #[test]
    fn handle_tofu_mismatch_accept_pins_second_row() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        engine.handle_tofu("a.example", "1.2.3.4:1965", b"first-cert").unwrap();
        let mut interaction = ScriptedInteraction::default();
        interaction.tofu_mismatch.push_back(true);
        engine.interaction = interaction;
        engine.handle_tofu("a.example", "1.2.3.4:1965", b"second-cert").unwrap();
        let rows = engine.trust.lookup("a.example", "1.2.3.4:1965").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn handle_tofu_mismatch_reject_raises_cert_error() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        engine.handle_tofu("a.example", "1.2.3.4:1965", b"first-cert").unwrap();
        let mut interaction = ScriptedInteraction::default();
        interaction.tofu_mismatch.push_back(false);
        engine.interaction = interaction;
        let result = engine.handle_tofu("a.example", "1.2.3.4:1965", b"second-cert");
        assert!(matches!(result, Err(EngineError::Cert(TrustStoreError::FingerprintMismatch { .. }))));
        let rows = engine.trust.lookup("a.example", "1.2.3.4:1965").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn handle_cert_challenge_restricted_mode_is_hard_failure() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        engine.options.restricted = true;
        let result = engine.handle_cert_challenge(64, "client cert required", "a.example");
        assert!(matches!(result, Err(EngineError::Restricted(_))));
    }

    #[test]
    fn handle_cert_challenge_abort_raises_user_abort() {
        let mut interaction = ScriptedInteraction::default();
        interaction.cert_challenges.push_back(CertChallengeChoice::Abort);
        let (mut engine, _dir) = engine(interaction);
        let result = engine.handle_cert_challenge(60, "cert required", "a.example");
        assert!(matches!(result, Err(EngineError::UserAbort)));
    }

    #[test]
    fn handle_cert_challenge_new_transient_activates_and_marks_fresh() {
        let mut interaction = ScriptedInteraction::default();
        interaction.cert_challenges.push_back(CertChallengeChoice::NewTransient);
        let (mut engine, _dir) = engine(interaction);
        engine.handle_cert_challenge(60, "cert required", "a.example").unwrap();
        assert!(engine.identities.active().is_some());
        assert_eq!(engine.fresh_identity_host.as_deref(), Some("a.example"));
    }

    #[test]
    fn preflight_identity_skips_guard_for_freshly_activated_host() {
        let mut interaction = ScriptedInteraction::default();
        interaction.cert_challenges.push_back(CertChallengeChoice::NewTransient);
        let (mut engine, _dir) = engine(interaction);
        engine.handle_cert_challenge(60, "cert required", "a.example").unwrap();
        // No cross_domain answer scripted: if the guard fired here, the
        // scripted fake would panic on an empty queue.
        engine.preflight_identity("a.example").unwrap();
    }

    #[test]
    fn preflight_identity_asks_before_switching_hosts() {
        let mut interaction = ScriptedInteraction::default();
        interaction.cert_challenges.push_back(CertChallengeChoice::NewTransient);
        interaction.cross_domain.push_back(true);
        let (mut engine, _dir) = engine(interaction);
        engine.handle_cert_challenge(60, "cert required", "a.example").unwrap();
        engine.preflight_identity("a.example").unwrap();
        engine.preflight_identity("b.example").unwrap();
        assert!(engine.identities.active().is_none());
    }

    #[test]
    fn preflight_identity_offers_reactivation() {
        let (mut engine, dir) = engine(ScriptedInteraction::default());
        let cert_path = dir.path().join("stored.crt");
        let key_path = dir.path().join("stored.key");
        std::fs::write(&cert_path, b"cert").unwrap();
        std::fs::write(&key_path, b"key").unwrap();
        engine.session_mut().last_identity_per_host.insert(
            "a.example".to_string(),
            IdentityRef {
                name: "stored".to_string(),
                cert_path,
                key_path,
                transient: false,
            },
        );
        let mut interaction = ScriptedInteraction::default();
        interaction.reactivation.push_back(true);
        engine.interaction = interaction;
        engine.preflight_identity("a.example").unwrap();
        assert_eq!(engine.identities.active().unwrap().name, "stored");
    }

    #[test]
    fn fetch_local_file_reads_and_renders_gemtext() {
        let (mut engine, dir) = engine(ScriptedInteraction::default());
        let file_path = dir.path().join("page.gmi");
        std::fs::write(&file_path, "# Hello\n=> other.gmi Other\n").unwrap();
        let url = GeminiUrl::parse(&format!("local-file://{}", file_path.display())).unwrap();
        let result = engine.fetch(url, FetchOptions::default()).unwrap();
        match result {
            FetchResult::Fetched(outcome) => {
                assert_eq!(outcome.mime, "text/gemini");
                assert!(outcome.page.is_some());
                assert_eq!(outcome.page.unwrap().links.len(), 1);
            }
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[test]
    fn http_scheme_delegates_to_browser() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        let url = u("https://web.example/");
        let result = engine.fetch(url.clone(), FetchOptions::default()).unwrap();
        assert!(matches!(result, FetchResult::DelegatedToBrowser(got) if got == url));
    }

    #[test]
    fn gopher_without_proxy_fails_with_explanatory_message() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        let url = u("gopher://a.example/");
        let result = engine.fetch(url, FetchOptions::default());
        assert!(matches!(result, Err(EngineError::UnsupportedScheme(_))));
    }

    #[test]
    fn gopher_with_proxy_dials_proxy_host_not_url_host() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        engine.options.gopher_proxy = Some(("proxy.example".to_string(), 1965));
        let url = u("gopher://unreachable.invalid/1/menu");
        // No real network in tests: connecting to "proxy.example" (which
        // does not resolve) fails with a resolution/connect error rather
        // than anything referencing unreachable.invalid, proving the host
        // override took effect before the dial was attempted.
        let result = engine.fetch(url, FetchOptions::default());
        assert!(result.is_err());
        assert!(!matches!(result, Err(EngineError::UnsupportedScheme(_))));
    }

    #[test]
    fn permanent_redirect_shortcut_skips_connecting_to_source() {
        let (mut engine, _dir) = engine(ScriptedInteraction::default());
        let src = u("gemini://a.example/x");
        let dst = u("local-file:///nonexistent-but-never-read");
        engine.session_mut().record_permanent_redirect(&src, dst);
        // The shortcut should route to local-file (which fails with a
        // plain I/O error) rather than attempting to dial a.example,
        // which would hang/fail differently if actually connected to.
        let result = engine.fetch(src, FetchOptions::default());
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
