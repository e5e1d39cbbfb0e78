//! Gateway errors

use thiserror::Error;

/// Errors raised while assembling or running the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A chain operation named a handler that is not present
    #[error("No route handler named {0:?}")]
    UnknownHandler(String),

    /// A handler with this name is already in the chain
    #[error("Route handler {0:?} already registered")]
    DuplicateHandler(String),

    /// The forwarding HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// I/O error (bind, accept)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
