//! The interaction contract: every point where the request engine needs
//! a yes/no decision or free text from whatever sits above the core.
//!
//! SPEC_FULL.md §4.8 names this seam explicitly — the distilled spec's
//! prose ("the user is prompted"/"asked"/"offered") never said what
//! interface that went through. The engine never touches stdio directly;
//! every prompt is a call through [`UserInteraction`], which keeps the
//! engine unit-testable with a scripted fake and free of any REPL-shaped
//! assumptions, mirroring how the teacher separates `GeminiClient` (pure
//! logic) from its Tauri command layer (the interactive shell, out of
//! scope here).

use std::path::PathBuf;

/// The operator's choice when a server returns a 6x client-certificate-
/// required status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertChallengeChoice {
    Abort,
    NewTransient,
    NewPersistent { name: String },
    LoadStored { name: String },
    LoadExternal { cert_path: PathBuf, key_path: PathBuf },
}

/// Implemented by whatever sits above the request engine (the REPL, out
/// of scope for this core) to answer every interactive decision point
/// named in SPEC_FULL.md §4.3a/§4.4. The numeric status is always passed
/// explicitly to `choose_cert_challenge`, resolving the open question in
/// §9 about the teacher's out-of-scope variable reference.
pub trait UserInteraction {
    /// An identity is active but hasn't been shown to `host` yet. `true`
    /// deactivates it and lets the request proceed bare; `false` aborts
    /// the request. Worded by the caller to emphasize destruction when
    /// `transient` is set, per §4.4.
    fn confirm_cross_domain_deactivation(&mut self, host: &str, transient: bool) -> bool;

    /// No identity is active, but `host` last used one named
    /// `identity_name`. `true` reactivates it; `false` forgets the host.
    fn offer_reactivation(&mut self, host: &str, identity_name: &str) -> bool;

    /// A 3x redirect is about to be followed; `true` proceeds. Always
    /// asked when auto-follow is disabled, and always asked (regardless
    /// of auto-follow) for a cross-host or cross-scheme hop.
    fn confirm_redirect(&mut self, from: &str, to: &str, cross_host: bool, cross_scheme: bool) -> bool;

    /// The server's fingerprint doesn't match any pinned row for this
    /// (host, address). `prior_count` is the most-seen prior fingerprint's
    /// count; `prior_expired` is `Some` only when date inspection ran.
    /// `true` pins the new fingerprint; `false` aborts as a cert error.
    fn confirm_tofu_mismatch(
        &mut self,
        host: &str,
        old_fingerprint: &str,
        new_fingerprint: &str,
        prior_count: u32,
        prior_expired: Option<bool>,
    ) -> bool;

    /// A 1x status requires input. `sensitive` is true for an 11 (no
    /// local echo while typing). Returns `None` if the user aborts.
    fn prompt_input(&mut self, prompt: &str, sensitive: bool) -> Option<String>;

    /// A 6x status requires a client certificate. `status` is passed
    /// explicitly (63/64/65 carry distinguishable wording) rather than
    /// read from an enclosing scope.
    fn choose_cert_challenge(&mut self, status: u8, meta: &str) -> CertChallengeChoice;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::VecDeque;

    /// A scripted [`UserInteraction`] for engine tests: each method pops
    /// its next canned answer off a queue and panics if the script runs
    /// dry, so a test that under-specifies its prompts fails loudly
    /// instead of silently defaulting.
    #[derive(Default)]
    pub struct ScriptedInteraction {
        pub cross_domain: VecDeque<bool>,
        pub reactivation: VecDeque<bool>,
        pub redirects: VecDeque<bool>,
        pub tofu_mismatch: VecDeque<bool>,
        pub inputs: VecDeque<Option<String>>,
        pub cert_challenges: VecDeque<CertChallengeChoice>,
    }

    impl UserInteraction for ScriptedInteraction {
        fn confirm_cross_domain_deactivation(&mut self, _host: &str, _transient: bool) -> bool {
            self.cross_domain.pop_front().expect("no scripted cross-domain answer")
        }

        fn offer_reactivation(&mut self, _host: &str, _identity_name: &str) -> bool {
            self.reactivation.pop_front().expect("no scripted reactivation answer")
        }

        fn confirm_redirect(&mut self, _from: &str, _to: &str, _cross_host: bool, _cross_scheme: bool) -> bool {
            self.redirects.pop_front().expect("no scripted redirect answer")
        }

        fn confirm_tofu_mismatch(
            &mut self,
            _host: &str,
            _old_fingerprint: &str,
            _new_fingerprint: &str,
            _prior_count: u32,
            _prior_expired: Option<bool>,
        ) -> bool {
            self.tofu_mismatch.pop_front().expect("no scripted TOFU-mismatch answer")
        }

        fn prompt_input(&mut self, _prompt: &str, _sensitive: bool) -> Option<String> {
            self.inputs.pop_front().expect("no scripted input answer")
        }

        fn choose_cert_challenge(&mut self, _status: u8, _meta: &str) -> CertChallengeChoice {
            self.cert_challenges.pop_front().expect("no scripted cert-challenge answer")
        }
    }
}
