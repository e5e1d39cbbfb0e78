//! Gateway HTTP server

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::state::GatewayState;

/// Axum router that sends every request through the handler chain
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

async fn dispatch(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    // Snapshot so long-lived relays don't hold the chain lock
    let chain = state.chain.read().await.clone();
    chain.dispatch(request).await
}

/// Serve the gateway on `listener` until `cancel` fires
pub async fn serve(
    listener: TcpListener,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
) -> Result<(), GatewayError> {
    let local_addr = listener.local_addr()?;
    tracing::info!("Gateway listening on http://{}", local_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("Gateway on {} stopped", local_addr);
    Ok(())
}
