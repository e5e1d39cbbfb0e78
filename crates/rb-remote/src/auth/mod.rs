//! Client authentication
//!
//! Credentials come from an [`IdentityProvider`] and a [`Prompter`]; the
//! [`AuthNegotiator`] decides the order and budgets, [`authenticate`] talks SSH.

mod driver;
mod identity;
mod negotiator;
mod prompt;

pub use driver::authenticate;
pub use identity::{ConfiguredIdentities, CredentialCandidate, IdentityProvider};
pub use negotiator::{
    decode_openssh_key, AuthAttempt, AuthMethod, AuthNegotiator, InteractivePrompt,
    KeyDecodeError, KeyDecoder, NegotiatorState,
};
pub use prompt::{NoPrompt, PromptKind, PromptRequest, Prompter};
