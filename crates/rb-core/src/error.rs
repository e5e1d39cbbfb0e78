//! Core error types for remote-bridge

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for establishing and running a remote bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Bootstrap error
    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the secure-shell transport
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not reach or handshake with the remote host
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    /// Connect attempt exceeded the configured timeout
    #[error("Connection to {0} timed out")]
    ConnectTimeout(String),

    /// A channel could not be opened on the session
    #[error("Failed to open channel: {0}")]
    ChannelOpen(String),

    /// The connection has been closed (disconnect or dispose)
    #[error("Connection closed")]
    Closed,

    /// Protocol-level failure from the SSH library
    #[error("SSH error: {0}")]
    Ssh(String),

    /// File transfer failure
    #[error("Copy to {remote} failed: {message}")]
    Copy { remote: String, message: String },

    /// Forward target was already fixed to a different port
    #[error("Forward port already set to {current}, refusing {requested}")]
    ForwardPortFixed { current: u16, requested: u16 },

    /// I/O error on a local resource
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Authentication negotiation failures
#[derive(Error, Debug)]
pub enum AuthError {
    /// Every offered method and credential was tried without success
    #[error("Authentication failed: all methods exhausted")]
    Exhausted,

    /// The user cancelled a credential prompt
    #[error("Authentication cancelled by user")]
    Cancelled,

    /// The transport failed while authenticating
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures while provisioning or launching the remote backend
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Platform probe produced output we could not classify
    #[error("Unable to detect remote platform from output: {0:?}")]
    UnknownPlatform(String),

    /// A probe never produced any output within its attempt ceiling
    #[error("No response to `{command}` after {attempts} attempts")]
    NoResponse { command: String, attempts: u32 },

    /// Home directory probe returned nothing usable
    #[error("Unable to resolve remote home directory")]
    HomeDirectory,

    /// Creating the application directory reported an error
    #[error("Failed to create {path}: {stderr}")]
    CreateDirectory { path: String, stderr: String },

    /// Runtime archive could not be downloaded
    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    /// Local payload packaging failed
    #[error("Failed to package application: {0}")]
    Package(String),

    /// A remote archive extraction failed
    #[error("Failed to extract {archive}: {stderr}")]
    Extract { archive: String, stderr: String },

    /// Backend process exited before announcing its port
    #[error("Remote backend did not report a listening port: {stderr}")]
    LaunchFailed { stderr: String },

    /// Backend process did not announce its port in time
    #[error("Remote backend did not report a listening port within {0:?}")]
    LaunchTimeout(std::time::Duration),

    /// Transport failure during bootstrap
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_lifts_into_bootstrap() {
        let err: BootstrapError = TransportError::Closed.into();
        assert!(matches!(err, BootstrapError::Transport(TransportError::Closed)));
        assert_eq!(err.to_string(), "Connection closed");
    }

    #[test]
    fn test_bridge_error_display() {
        let err: BridgeError = AuthError::Exhausted.into();
        assert_eq!(
            err.to_string(),
            "Authentication error: Authentication failed: all methods exhausted"
        );
    }
}
