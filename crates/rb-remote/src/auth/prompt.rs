//! Interactive credential prompts

use std::path::PathBuf;

use async_trait::async_trait;

/// What a prompt is asking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    /// Passphrase for an encrypted key file
    Passphrase { key: PathBuf },
    /// Account password
    Password,
    /// One question of a keyboard-interactive round
    KeyboardInteractive,
}

/// A single request for user input
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub kind: PromptKind,
    /// Text shown to the user
    pub message: String,
    /// Whether the answer may be echoed back while typing
    pub echo: bool,
}

impl PromptRequest {
    pub fn passphrase(key: PathBuf) -> Self {
        Self {
            message: format!("Enter passphrase for {}", key.display()),
            kind: PromptKind::Passphrase { key },
            echo: false,
        }
    }

    pub fn password(label: &str) -> Self {
        Self {
            kind: PromptKind::Password,
            message: format!("Enter password for {}", label),
            echo: false,
        }
    }

    pub fn keyboard_interactive(message: impl Into<String>, echo: bool) -> Self {
        Self {
            kind: PromptKind::KeyboardInteractive,
            message: message.into(),
            echo,
        }
    }
}

/// Asks the user for credentials. `None` means the user cancelled.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn prompt(&self, request: PromptRequest) -> Option<String>;
}

/// Prompter that always cancels, for unattended connections
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

#[async_trait]
impl Prompter for NoPrompt {
    async fn prompt(&self, request: PromptRequest) -> Option<String> {
        tracing::debug!("Declining prompt: {}", request.message);
        None
    }
}
