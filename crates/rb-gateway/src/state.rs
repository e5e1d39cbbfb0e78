//! Shared gateway state

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::GatewayError;
use crate::proxy::{ProxyServerProvider, ProxyTable};
use crate::registry::{ConnectionRegistry, RemovalListener};
use crate::router::{
    HandlerChain, RemoteProxyHandler, StaticFilesHandler, StatusHandler, REMOTE_PROXY,
    STATIC_FILES, STATUS,
};

/// State shared by every request the gateway serves
pub struct GatewayState {
    /// Live sessions
    pub registry: Arc<ConnectionRegistry>,
    /// Per-session proxy listeners
    pub proxies: Arc<ProxyTable>,
    /// Handler chain, editable while serving
    pub chain: RwLock<HandlerChain>,
}

impl GatewayState {
    /// Build the registry, proxy table and default handler chain.
    ///
    /// Removing a session from the registry disposes its proxy listener.
    pub fn new(static_dir: Option<PathBuf>) -> Result<Arc<Self>, GatewayError> {
        let proxies = Arc::new(ProxyTable::new(ProxyServerProvider::new()));

        let released = Arc::clone(&proxies);
        let listener: RemovalListener = Box::new(move |id| released.dispose_session(id));
        let registry = Arc::new(ConnectionRegistry::with_listeners(vec![listener]));

        let mut chain = HandlerChain::new();
        chain.push(STATUS, Arc::new(StatusHandler::new(Arc::clone(&registry))))?;
        if let Some(dir) = static_dir {
            tracing::info!("Serving static files from {}", dir.display());
            chain.push(STATIC_FILES, Arc::new(StaticFilesHandler::new(dir)))?;
        }

        let remote = Arc::new(RemoteProxyHandler::new(
            Arc::clone(&registry),
            Arc::clone(&proxies),
        )?);
        if chain.contains(STATIC_FILES) {
            chain.insert_before(STATIC_FILES, REMOTE_PROXY, remote)?;
        } else {
            chain.push(REMOTE_PROXY, remote)?;
        }

        Ok(Arc::new(Self {
            registry,
            proxies,
            chain: RwLock::new(chain),
        }))
    }
}
