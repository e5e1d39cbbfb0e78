//! Authentication negotiation state machine
//!
//! The negotiator decides *what* to try next from the methods the server still
//! offers; the driver in [`super::driver`] performs the attempts over SSH and
//! feeds the server's answer back in. Retry budgets live here, one per method,
//! and persist for the whole connection attempt.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use russh::keys::PrivateKey;
use tracing::{debug, warn};

use rb_core::config::AuthConfig;
use rb_core::error::AuthError;

use super::identity::CredentialCandidate;
use super::prompt::{PromptRequest, Prompter};

/// Authentication methods as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMethod {
    None,
    PublicKey,
    Password,
    KeyboardInteractive,
    HostBased,
}

/// Where the negotiator currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatorState {
    AwaitMethod,
    TryPublicKey,
    TryPassword,
    TryKeyboardInteractive,
    Exhausted,
}

/// Next thing the driver should submit to the server
#[derive(Debug)]
pub enum AuthAttempt {
    None,
    PublicKey(Arc<PrivateKey>),
    Password(String),
    /// Start a keyboard-interactive round; answers come from [`AuthNegotiator::answer_prompts`]
    KeyboardInteractive,
}

/// One question in a keyboard-interactive round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractivePrompt {
    pub text: String,
    pub echo: bool,
}

/// Why a key could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDecodeError {
    /// The key is passphrase-protected and the passphrase was missing or wrong
    Encrypted,
    /// Anything else: unsupported format, corrupt file
    Invalid(String),
}

/// Parses key text with an optional passphrase
pub type KeyDecoder = fn(&str, Option<&str>) -> Result<PrivateKey, KeyDecodeError>;

/// OpenSSH / PEM decoding through russh
pub fn decode_openssh_key(text: &str, passphrase: Option<&str>) -> Result<PrivateKey, KeyDecodeError> {
    match russh::keys::decode_secret_key(text, passphrase) {
        Ok(key) => Ok(key),
        Err(russh::keys::Error::KeyIsEncrypted) => Err(KeyDecodeError::Encrypted),
        Err(e) => Err(KeyDecodeError::Invalid(e.to_string())),
    }
}

/// Drives method selection for one connection attempt
pub struct AuthNegotiator {
    label: String,
    candidates: VecDeque<CredentialCandidate>,
    prompter: Arc<dyn Prompter>,
    decoder: KeyDecoder,
    passphrase_retries: u32,
    password_budget: u32,
    keyboard_budget: u32,
    state: NegotiatorState,
}

impl AuthNegotiator {
    /// Create a negotiator for `label` (`user@host`, used in prompts)
    pub fn new(
        label: impl Into<String>,
        candidates: Vec<CredentialCandidate>,
        prompter: Arc<dyn Prompter>,
        budgets: &AuthConfig,
    ) -> Self {
        Self {
            label: label.into(),
            candidates: candidates.into(),
            prompter,
            decoder: decode_openssh_key,
            passphrase_retries: budgets.passphrase_retries,
            password_budget: budgets.password_retries,
            keyboard_budget: budgets.keyboard_interactive_retries,
            state: NegotiatorState::AwaitMethod,
        }
    }

    /// Replace the key decoder
    pub fn with_key_decoder(mut self, decoder: KeyDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn state(&self) -> NegotiatorState {
        self.state
    }

    /// Remaining password submissions
    pub fn password_budget(&self) -> u32 {
        self.password_budget
    }

    /// Remaining keyboard-interactive rounds
    pub fn keyboard_interactive_budget(&self) -> u32 {
        self.keyboard_budget
    }

    /// Candidates not yet tried
    pub fn remaining_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Pick the next attempt given the methods the server still offers.
    ///
    /// `offered` is `None` before the first exchange, which yields a `none`
    /// attempt. Afterwards the priority is public key, password, then
    /// keyboard-interactive, each bounded by its own budget.
    pub async fn next_attempt(
        &mut self,
        offered: Option<&[AuthMethod]>,
    ) -> Result<AuthAttempt, AuthError> {
        let Some(offered) = offered else {
            self.state = NegotiatorState::AwaitMethod;
            debug!("Probing {} with method none", self.label);
            return Ok(AuthAttempt::None);
        };

        if offered.is_empty() {
            debug!("Server offered no further methods");
            return self.exhausted();
        }

        if offered.contains(&AuthMethod::PublicKey) {
            self.state = NegotiatorState::TryPublicKey;
            while let Some(candidate) = self.candidates.pop_front() {
                if let Some(key) = self.load_candidate(candidate).await {
                    return Ok(AuthAttempt::PublicKey(key));
                }
            }
        }

        if offered.contains(&AuthMethod::Password) && self.password_budget > 0 {
            self.state = NegotiatorState::TryPassword;
            let request = PromptRequest::password(&self.label);
            let Some(password) = self.prompter.prompt(request).await else {
                self.state = NegotiatorState::Exhausted;
                return Err(AuthError::Cancelled);
            };
            self.password_budget -= 1;
            return Ok(AuthAttempt::Password(password));
        }

        if offered.contains(&AuthMethod::KeyboardInteractive) && self.keyboard_budget > 0 {
            self.state = NegotiatorState::TryKeyboardInteractive;
            self.keyboard_budget -= 1;
            return Ok(AuthAttempt::KeyboardInteractive);
        }

        self.exhausted()
    }

    /// Collect answers for one keyboard-interactive info request.
    ///
    /// `None` means a prompt was cancelled: the round must be abandoned and no
    /// budget is left for another one.
    pub async fn answer_prompts(&mut self, prompts: &[InteractivePrompt]) -> Option<Vec<String>> {
        let mut answers = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let request = PromptRequest::keyboard_interactive(prompt.text.clone(), prompt.echo);
            match self.prompter.prompt(request).await {
                Some(answer) => answers.push(answer),
                None => {
                    debug!("Keyboard-interactive prompt cancelled");
                    self.keyboard_budget = 0;
                    return None;
                }
            }
        }
        Some(answers)
    }

    fn exhausted(&mut self) -> Result<AuthAttempt, AuthError> {
        self.state = NegotiatorState::Exhausted;
        Err(AuthError::Exhausted)
    }

    async fn load_candidate(&self, candidate: CredentialCandidate) -> Option<Arc<PrivateKey>> {
        let path = match candidate {
            CredentialCandidate::Key(key) => return Some(key),
            CredentialCandidate::KeyFile(path) => path,
        };

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                debug!("Skipping identity {}: {}", path.display(), e);
                return None;
            }
        };

        match (self.decoder)(&text, None) {
            Ok(key) => Some(Arc::new(key)),
            Err(KeyDecodeError::Encrypted) => self.unlock(&path, &text).await,
            Err(KeyDecodeError::Invalid(reason)) => {
                warn!("Skipping identity {}: {}", path.display(), reason);
                None
            }
        }
    }

    async fn unlock(&self, path: &Path, text: &str) -> Option<Arc<PrivateKey>> {
        for attempt in 1..=self.passphrase_retries {
            let request = PromptRequest::passphrase(path.to_path_buf());
            let Some(passphrase) = self.prompter.prompt(request).await else {
                debug!("Passphrase prompt for {} cancelled", path.display());
                return None;
            };

            match (self.decoder)(text, Some(&passphrase)) {
                Ok(key) => return Some(Arc::new(key)),
                Err(e) => debug!(
                    "Passphrase attempt {}/{} for {} failed: {:?}",
                    attempt,
                    self.passphrase_retries,
                    path.display(),
                    e
                ),
            }
        }

        warn!("Giving up on encrypted identity {}", path.display());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::prompt::PromptKind;
    use async_trait::async_trait;
    use russh::keys::ssh_key::private::Ed25519Keypair;
    use std::sync::Mutex;

    /// Prompter replaying scripted answers and recording what was asked
    #[derive(Default)]
    struct ScriptedPrompter {
        answers: Mutex<VecDeque<Option<String>>>,
        asked: Mutex<Vec<PromptRequest>>,
    }

    impl ScriptedPrompter {
        fn new(answers: &[Option<&str>]) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.iter().map(|a| a.map(String::from)).collect()),
                asked: Mutex::new(Vec::new()),
            })
        }

        fn asked(&self) -> Vec<PromptRequest> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Prompter for ScriptedPrompter {
        async fn prompt(&self, request: PromptRequest) -> Option<String> {
            self.asked.lock().unwrap().push(request);
            self.answers.lock().unwrap().pop_front().flatten()
        }
    }

    fn test_key() -> PrivateKey {
        PrivateKey::from(Ed25519Keypair::from_seed(&[7u8; 32]))
    }

    /// `plain` decodes, `encrypted:<pass>` needs `<pass>`, anything else is invalid
    fn fake_decoder(text: &str, passphrase: Option<&str>) -> Result<PrivateKey, KeyDecodeError> {
        let text = text.trim();
        if text == "plain" {
            return Ok(test_key());
        }
        match text.strip_prefix("encrypted:") {
            Some(expected) if passphrase == Some(expected) => Ok(test_key()),
            Some(_) => Err(KeyDecodeError::Encrypted),
            None => Err(KeyDecodeError::Invalid("not a key".into())),
        }
    }

    fn budgets() -> AuthConfig {
        AuthConfig::default()
    }

    const ALL: &[AuthMethod] = &[
        AuthMethod::PublicKey,
        AuthMethod::Password,
        AuthMethod::KeyboardInteractive,
    ];

    #[tokio::test]
    async fn test_first_attempt_is_none() {
        let prompter = ScriptedPrompter::new(&[]);
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter, &budgets());

        let attempt = negotiator.next_attempt(None).await.unwrap();
        assert!(matches!(attempt, AuthAttempt::None));
        assert_eq!(negotiator.state(), NegotiatorState::AwaitMethod);
    }

    #[tokio::test]
    async fn test_empty_method_list_fails() {
        let prompter = ScriptedPrompter::new(&[]);
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter, &budgets());

        let err = negotiator.next_attempt(Some(&[])).await.unwrap_err();
        assert!(matches!(err, AuthError::Exhausted));
        assert_eq!(negotiator.state(), NegotiatorState::Exhausted);
    }

    #[tokio::test]
    async fn test_decrypted_key_is_submitted_without_prompting() {
        let prompter = ScriptedPrompter::new(&[]);
        let candidates = vec![CredentialCandidate::Key(Arc::new(test_key()))];
        let mut negotiator =
            AuthNegotiator::new("alice@host", candidates, prompter.clone(), &budgets());

        let attempt = negotiator.next_attempt(Some(ALL)).await.unwrap();
        assert!(matches!(attempt, AuthAttempt::PublicKey(_)));
        assert_eq!(negotiator.state(), NegotiatorState::TryPublicKey);
        assert_eq!(negotiator.password_budget(), 3);
        assert_eq!(negotiator.keyboard_interactive_budget(), 3);
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_invalid_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage");
        let good = dir.path().join("good");
        std::fs::write(&garbage, "nonsense").unwrap();
        std::fs::write(&good, "plain").unwrap();

        let candidates = vec![
            CredentialCandidate::KeyFile(dir.path().join("missing")),
            CredentialCandidate::KeyFile(garbage),
            CredentialCandidate::KeyFile(good),
        ];
        let prompter = ScriptedPrompter::new(&[]);
        let mut negotiator = AuthNegotiator::new("alice@host", candidates, prompter.clone(), &budgets())
            .with_key_decoder(fake_decoder);

        let attempt = negotiator.next_attempt(Some(ALL)).await.unwrap();
        assert!(matches!(attempt, AuthAttempt::PublicKey(_)));
        assert_eq!(negotiator.remaining_candidates(), 0);
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn test_encrypted_key_prompts_until_passphrase_matches() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, "encrypted:hunter2").unwrap();

        let prompter = ScriptedPrompter::new(&[Some("wrong"), Some("hunter2")]);
        let mut negotiator = AuthNegotiator::new(
            "alice@host",
            vec![CredentialCandidate::KeyFile(key.clone())],
            prompter.clone(),
            &budgets(),
        )
        .with_key_decoder(fake_decoder);

        let attempt = negotiator.next_attempt(Some(ALL)).await.unwrap();
        assert!(matches!(attempt, AuthAttempt::PublicKey(_)));

        let asked = prompter.asked();
        assert_eq!(asked.len(), 2);
        assert!(asked
            .iter()
            .all(|r| r.kind == PromptKind::Passphrase { key: key.clone() } && !r.echo));
    }

    #[tokio::test]
    async fn test_passphrase_budget_moves_to_next_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let locked = dir.path().join("locked");
        let cancelled = dir.path().join("cancelled");
        std::fs::write(&locked, "encrypted:secret").unwrap();
        std::fs::write(&cancelled, "encrypted:other").unwrap();

        // Three wrong passphrases for the first key, a cancel for the second
        let prompter = ScriptedPrompter::new(&[Some("a"), Some("b"), Some("c"), None, Some("pw")]);
        let mut negotiator = AuthNegotiator::new(
            "alice@host",
            vec![
                CredentialCandidate::KeyFile(locked),
                CredentialCandidate::KeyFile(cancelled),
            ],
            prompter.clone(),
            &budgets(),
        )
        .with_key_decoder(fake_decoder);

        let attempt = negotiator.next_attempt(Some(ALL)).await.unwrap();
        match attempt {
            AuthAttempt::Password(password) => assert_eq!(password, "pw"),
            other => panic!("expected password attempt, got {:?}", other),
        }
        assert_eq!(negotiator.state(), NegotiatorState::TryPassword);
        assert_eq!(prompter.asked().len(), 5);
    }

    #[tokio::test]
    async fn test_password_budget_then_keyboard_interactive() {
        let prompter = ScriptedPrompter::new(&[Some("one"), Some("two"), Some("three")]);
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter.clone(), &budgets());
        let offered = &[AuthMethod::Password, AuthMethod::KeyboardInteractive];

        for _ in 0..3 {
            let attempt = negotiator.next_attempt(Some(offered)).await.unwrap();
            assert!(matches!(attempt, AuthAttempt::Password(_)));
        }
        assert_eq!(negotiator.password_budget(), 0);

        let attempt = negotiator.next_attempt(Some(offered)).await.unwrap();
        assert!(matches!(attempt, AuthAttempt::KeyboardInteractive));
        assert_eq!(negotiator.state(), NegotiatorState::TryKeyboardInteractive);

        // No fourth password prompt was issued
        assert_eq!(prompter.asked().len(), 3);
    }

    #[tokio::test]
    async fn test_wrong_password_three_times_exhausts() {
        let prompter = ScriptedPrompter::new(&[Some("x"), Some("y"), Some("z"), Some("never")]);
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter.clone(), &budgets());
        let offered = &[AuthMethod::Password];

        for _ in 0..3 {
            negotiator.next_attempt(Some(offered)).await.unwrap();
        }
        let err = negotiator.next_attempt(Some(offered)).await.unwrap_err();
        assert!(matches!(err, AuthError::Exhausted));
        assert_eq!(prompter.asked().len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_password_prompt_aborts() {
        let prompter = ScriptedPrompter::new(&[None]);
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter, &budgets());

        let err = negotiator
            .next_attempt(Some(&[AuthMethod::Password, AuthMethod::KeyboardInteractive]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Cancelled));
    }

    #[tokio::test]
    async fn test_keyboard_interactive_cancel_zeroes_budget() {
        let prompter = ScriptedPrompter::new(&[Some("alice"), None]);
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter.clone(), &budgets());
        let offered = &[AuthMethod::KeyboardInteractive];

        let attempt = negotiator.next_attempt(Some(offered)).await.unwrap();
        assert!(matches!(attempt, AuthAttempt::KeyboardInteractive));
        assert_eq!(negotiator.keyboard_interactive_budget(), 2);

        let prompts = vec![
            InteractivePrompt { text: "Username: ".into(), echo: true },
            InteractivePrompt { text: "Password: ".into(), echo: false },
            InteractivePrompt { text: "OTP: ".into(), echo: false },
        ];
        assert_eq!(negotiator.answer_prompts(&prompts).await, None);
        assert_eq!(negotiator.keyboard_interactive_budget(), 0);

        let asked = prompter.asked();
        assert_eq!(asked.len(), 2);
        assert!(asked[0].echo);
        assert!(!asked[1].echo);

        let err = negotiator.next_attempt(Some(offered)).await.unwrap_err();
        assert!(matches!(err, AuthError::Exhausted));
    }

    #[tokio::test]
    async fn test_last_keyboard_interactive_round_still_answers() {
        let prompter = ScriptedPrompter::new(&[Some("123456")]);
        let mut config = budgets();
        config.keyboard_interactive_retries = 1;
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter, &config);

        let attempt = negotiator
            .next_attempt(Some(&[AuthMethod::KeyboardInteractive]))
            .await
            .unwrap();
        assert!(matches!(attempt, AuthAttempt::KeyboardInteractive));
        assert_eq!(negotiator.keyboard_interactive_budget(), 0);

        let prompts = vec![InteractivePrompt { text: "OTP: ".into(), echo: false }];
        assert_eq!(
            negotiator.answer_prompts(&prompts).await,
            Some(vec!["123456".to_string()])
        );
    }

    #[tokio::test]
    async fn test_publickey_only_with_no_candidates_exhausts() {
        let prompter = ScriptedPrompter::new(&[]);
        let mut negotiator = AuthNegotiator::new("alice@host", vec![], prompter, &budgets());

        let err = negotiator
            .next_attempt(Some(&[AuthMethod::PublicKey]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Exhausted));
    }
}
