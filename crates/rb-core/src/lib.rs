//! rb-core: Core abstractions and configuration for remote-bridge
//!
//! This crate provides the shared domain types, error taxonomy, collaborator
//! traits and configuration used by the remote, gateway and CLI crates.

pub mod config;
pub mod error;
pub mod exec;
pub mod traits;
pub mod types;

pub use error::BridgeError;
pub use types::{RemotePlatform, SessionDescriptor, SessionId};
