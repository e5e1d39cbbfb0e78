//! remote-bridge CLI
//!
//! Provides the `remote-bridge` binary: connect to a remote host, bootstrap
//! the backend there and serve the local gateway in front of it.

pub mod commands;
pub mod interactive;
pub mod output;
