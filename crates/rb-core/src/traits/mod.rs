//! Core trait definitions

mod collaborator;
mod remote;

pub use collaborator::{PayloadPackager, ProgressSink, TracingProgress};
pub use remote::{Forwarder, RemoteHost};
