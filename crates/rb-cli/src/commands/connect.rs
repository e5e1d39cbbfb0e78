//! `connect`: establish a remote session and serve the local gateway

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use rb_core::config::BridgeConfig;
use rb_core::traits::Forwarder;
use rb_core::SessionDescriptor;
use rb_gateway::GatewayState;
use rb_remote::auth::{ConfiguredIdentities, NoPrompt, Prompter};
use rb_remote::{establish, Collaborators, ConnectTarget, HttpRuntimeFetcher, TarPackager};

use crate::interactive::{ConsoleProgress, TerminalPrompter};
use crate::output::{print_info, print_success, print_warning, session_cookie};

/// Flags of the `connect` command that override the config file
#[derive(Debug, Default, Clone)]
pub struct ConnectOverrides {
    pub identity_files: Vec<PathBuf>,
    pub bind: Option<String>,
    pub static_dir: Option<PathBuf>,
    pub app_dir: Option<PathBuf>,
    pub entry_point: Option<String>,
    pub no_prompt: bool,
}

impl ConnectOverrides {
    /// Apply the overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut BridgeConfig) {
        if !self.identity_files.is_empty() {
            config.ssh.identity_files = self.identity_files.clone();
        }
        if let Some(bind) = &self.bind {
            config.gateway.bind_address = bind.clone();
        }
        if let Some(dir) = &self.static_dir {
            config.gateway.static_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.app_dir {
            config.app.local_dir = dir.clone();
        }
        if let Some(entry) = &self.entry_point {
            config.app.entry_point = entry.clone();
        }
    }
}

fn collaborators(config: &BridgeConfig, no_prompt: bool) -> Collaborators {
    let prompter: Arc<dyn Prompter> = if no_prompt {
        Arc::new(NoPrompt)
    } else {
        Arc::new(TerminalPrompter)
    };

    Collaborators {
        identities: Arc::new(ConfiguredIdentities::new(
            config.ssh.identity_files.clone(),
        )),
        prompter,
        packager: Arc::new(TarPackager::new(
            config.app.local_dir.clone(),
            &config.runtime.cache_dir,
            &config.app.name,
        )),
        fetcher: Arc::new(HttpRuntimeFetcher::new(config.runtime.cache_dir.clone())),
        progress: Arc::new(ConsoleProgress),
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}

/// Execute the connect command
pub async fn connect_command(
    target: &str,
    mut config: BridgeConfig,
    overrides: &ConnectOverrides,
) -> Result<()> {
    overrides.apply(&mut config);

    let target = ConnectTarget::parse(target, &config.ssh)
        .with_context(|| format!("Invalid target: {}", target))?;
    let label = target.label();

    let established = establish(&target, &config, &collaborators(&config, overrides.no_prompt))
        .await
        .with_context(|| format!("Failed to establish session with {}", label))?;
    let connection = established.connection;
    let outcome = established.outcome;
    print_success(&format!(
        "{} ({}) backend running from {} on remote port {}",
        label, outcome.platform, outcome.app_dir, outcome.port
    ));

    let state = match GatewayState::new(config.gateway.static_dir.clone()) {
        Ok(state) => state,
        Err(e) => {
            connection.dispose().await;
            return Err(e).context("Failed to build gateway");
        }
    };
    let listener = match TcpListener::bind(&config.gateway.bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            connection.dispose().await;
            return Err(e).with_context(|| {
                format!("Failed to bind gateway to {}", config.gateway.bind_address)
            });
        }
    };
    let local_addr = listener.local_addr()?;

    let forwarder: Arc<dyn Forwarder> = connection.clone();
    let handle = state.registry.register(
        forwarder,
        SessionDescriptor::ssh(label.clone(), outcome.port),
    );

    print_success(&format!("Gateway listening on http://{}", local_addr));
    print_info(&format!("Session cookie: {}", session_cookie(handle.id().as_str())));
    print_info("Press Ctrl+C to disconnect");

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    let disconnected = connection.disconnected();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = disconnected.cancelled() => {
                print_warning("Remote connection closed");
            }
            _ = watcher.cancelled() => {}
        }
        watcher.cancel();
    });

    let served = rb_gateway::serve(listener, Arc::clone(&state), cancel.clone()).await;
    cancel.cancel();

    handle.dispose();
    connection.dispose().await;
    print_info(&format!("Disconnected from {}", label));

    served.context("Gateway server failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_replace_config_values() {
        let mut config = BridgeConfig::default();
        let overrides = ConnectOverrides {
            identity_files: vec![PathBuf::from("/keys/deploy")],
            bind: Some("127.0.0.1:9000".to_string()),
            static_dir: Some(PathBuf::from("/srv/www")),
            app_dir: None,
            entry_point: Some("server.js".to_string()),
            no_prompt: true,
        };

        overrides.apply(&mut config);
        assert_eq!(config.ssh.identity_files, vec![PathBuf::from("/keys/deploy")]);
        assert_eq!(config.gateway.bind_address, "127.0.0.1:9000");
        assert_eq!(config.gateway.static_dir, Some(PathBuf::from("/srv/www")));
        assert_eq!(config.app.local_dir, PathBuf::from("."));
        assert_eq!(config.app.entry_point, "server.js");
    }

    #[test]
    fn test_empty_overrides_keep_config() {
        let mut config = BridgeConfig::default();
        let before = config.ssh.identity_files.clone();
        ConnectOverrides::default().apply(&mut config);
        assert_eq!(config.ssh.identity_files, before);
        assert_eq!(config.gateway.bind_address, "127.0.0.1:8080");
    }
}
