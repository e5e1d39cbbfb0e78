//! rb-remote: SSH side of remote-bridge
//!
//! Connects and authenticates to a remote host, bootstraps the application
//! backend there and exposes the connection for command execution, file copy
//! and port forwarding.

pub mod auth;
pub mod bootstrap;
pub mod connection;
pub mod package;

pub use bootstrap::{BootstrapOutcome, Bootstrapper, HttpRuntimeFetcher, RuntimeFetcher};
pub use connection::{ConnectTarget, RemoteConnection};
pub use package::TarPackager;

use std::sync::Arc;

use tracing::{info, warn};

use rb_core::config::BridgeConfig;
use rb_core::error::BridgeError;
use rb_core::traits::{PayloadPackager, ProgressSink};

use auth::{AuthNegotiator, IdentityProvider, Prompter};

/// External collaborators used while establishing a session
#[derive(Clone)]
pub struct Collaborators {
    pub identities: Arc<dyn IdentityProvider>,
    pub prompter: Arc<dyn Prompter>,
    pub packager: Arc<dyn PayloadPackager>,
    pub fetcher: Arc<dyn RuntimeFetcher>,
    pub progress: Arc<dyn ProgressSink>,
}

/// A connected, authenticated and bootstrapped remote
pub struct Established {
    pub connection: Arc<RemoteConnection>,
    pub outcome: BootstrapOutcome,
}

/// Connect to `target`, authenticate, bootstrap the backend and fix the forward port.
///
/// On any failure the half-built connection is disposed before returning.
pub async fn establish(
    target: &ConnectTarget,
    config: &BridgeConfig,
    collaborators: &Collaborators,
) -> Result<Established, BridgeError> {
    let label = target.label();
    collaborators
        .progress
        .report(&format!("Connecting to {}", label));
    let mut connection = RemoteConnection::connect(target, &config.ssh).await?;

    let candidates = collaborators.identities.gather_candidates().await;
    let mut negotiator = AuthNegotiator::new(
        label.clone(),
        candidates,
        collaborators.prompter.clone(),
        &config.auth,
    );
    if let Err(e) = connection.authenticate(&mut negotiator).await {
        warn!("Authentication to {} failed: {}", label, e);
        connection.dispose().await;
        return Err(e.into());
    }
    info!("Authenticated to {}", label);

    let connection = Arc::new(connection);
    let bootstrapper = Bootstrapper::new(
        config,
        collaborators.packager.clone(),
        collaborators.fetcher.clone(),
        collaborators.progress.clone(),
    );

    let outcome = match bootstrapper.run(connection.as_ref()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Bootstrap of {} failed: {}", label, e);
            connection.dispose().await;
            return Err(e.into());
        }
    };

    if let Err(e) = connection.set_forward_port(outcome.port) {
        connection.dispose().await;
        return Err(e.into());
    }

    collaborators
        .progress
        .report(&format!("Remote backend ready on port {}", outcome.port));
    Ok(Established {
        connection,
        outcome,
    })
}
