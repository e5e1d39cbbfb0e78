//! Boundaries to external collaborators

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::BootstrapError;

/// Produces the local archive of the application payload
#[async_trait]
pub trait PayloadPackager: Send + Sync {
    /// Package the application and return the path of the local archive
    async fn package_application(&self) -> Result<PathBuf, BootstrapError>;
}

/// Fire-and-forget sink for human-readable progress messages
pub trait ProgressSink: Send + Sync {
    /// Report a status line
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Progress sink that writes to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, message: &str) {
        tracing::info!("{}", message);
    }
}
