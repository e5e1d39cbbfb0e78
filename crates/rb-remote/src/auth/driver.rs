//! Executes negotiator decisions against a russh client handle

use russh::client::{self, AuthResult, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::PrivateKeyWithHashAlg;
use russh::MethodKind;
use tracing::{debug, info};

use rb_core::error::{AuthError, TransportError};

use super::negotiator::{AuthAttempt, AuthMethod, AuthNegotiator, InteractivePrompt};

impl From<MethodKind> for AuthMethod {
    fn from(kind: MethodKind) -> Self {
        match kind {
            MethodKind::None => AuthMethod::None,
            MethodKind::Password => AuthMethod::Password,
            MethodKind::PublicKey => AuthMethod::PublicKey,
            MethodKind::HostBased => AuthMethod::HostBased,
            MethodKind::KeyboardInteractive => AuthMethod::KeyboardInteractive,
        }
    }
}

fn ssh_error(e: russh::Error) -> AuthError {
    AuthError::Transport(TransportError::Ssh(e.to_string()))
}

/// Authenticate `username` on `handle`, letting `negotiator` choose each step.
///
/// Returns once the server accepts a method, or with the negotiator's
/// `Exhausted`/`Cancelled` error.
pub async fn authenticate<H: client::Handler>(
    handle: &mut Handle<H>,
    username: &str,
    negotiator: &mut AuthNegotiator,
) -> Result<(), AuthError> {
    let mut offered: Option<Vec<AuthMethod>> = None;

    loop {
        let attempt = negotiator.next_attempt(offered.as_deref()).await?;

        let result = match attempt {
            AuthAttempt::None => handle.authenticate_none(username).await.map_err(ssh_error)?,
            AuthAttempt::PublicKey(key) => {
                debug!("Trying public key {}", key.algorithm());
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(ssh_error)?
                    .flatten();
                handle
                    .authenticate_publickey(username, PrivateKeyWithHashAlg::new(key, hash))
                    .await
                    .map_err(ssh_error)?
            }
            AuthAttempt::Password(password) => {
                debug!("Trying password");
                handle
                    .authenticate_password(username, password)
                    .await
                    .map_err(ssh_error)?
            }
            AuthAttempt::KeyboardInteractive => {
                debug!("Starting keyboard-interactive round");
                if keyboard_interactive(handle, username, negotiator).await? {
                    info!("Authenticated {} via keyboard-interactive", username);
                    return Ok(());
                }
                // A failed round leaves the offered list as it was
                continue;
            }
        };

        match result {
            AuthResult::Success => {
                info!("Authenticated {}", username);
                return Ok(());
            }
            AuthResult::Failure {
                remaining_methods, ..
            } => {
                let methods: Vec<AuthMethod> = remaining_methods
                    .iter()
                    .copied()
                    .map(AuthMethod::from)
                    .collect();
                debug!("Server still offers {:?}", methods);
                offered = Some(methods);
            }
        }
    }
}

/// Run one keyboard-interactive round; `true` on success
async fn keyboard_interactive<H: client::Handler>(
    handle: &mut Handle<H>,
    username: &str,
    negotiator: &mut AuthNegotiator,
) -> Result<bool, AuthError> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(username, None)
        .await
        .map_err(ssh_error)?;

    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { ref prompts, .. } => {
                let prompts: Vec<InteractivePrompt> = prompts
                    .iter()
                    .map(|p| InteractivePrompt {
                        text: p.prompt.clone(),
                        echo: p.echo,
                    })
                    .collect();
                let Some(answers) = negotiator.answer_prompts(&prompts).await else {
                    debug!("Keyboard-interactive round abandoned");
                    return Ok(false);
                };
                response = handle
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(ssh_error)?;
            }
        }
    }
}
