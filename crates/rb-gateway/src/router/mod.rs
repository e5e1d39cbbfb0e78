//! Traffic router
//!
//! Inbound requests run through an ordered chain of named handlers. Each
//! handler either answers the request or passes it on; a request nobody
//! answers gets `404 Not Found`.

mod remote;
mod static_files;
mod status;

pub use remote::RemoteProxyHandler;
pub use static_files::StaticFilesHandler;
pub use status::StatusHandler;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use rb_core::SessionId;

use crate::error::GatewayError;

/// Cookie carrying the session token
pub const SESSION_COOKIE: &str = "remoteId";

/// Handler name for the status endpoint
pub const STATUS: &str = "status";
/// Handler name for session forwarding
pub const REMOTE_PROXY: &str = "remote-proxy";
/// Handler name for the local static directory
pub const STATIC_FILES: &str = "static-files";

/// Outcome of one handler
pub enum Flow {
    /// The request was answered
    Respond(Response),
    /// Hand the request to the next handler
    Continue(Request),
}

/// Per-request data extracted once before the chain runs
#[derive(Debug, Clone, Default)]
pub struct RouteContext {
    pub token: Option<SessionId>,
}

impl RouteContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            token: session_token(headers),
        }
    }
}

/// A named step of the handler chain
#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle(&self, request: Request, context: &RouteContext) -> Flow;
}

/// Ordered, named handler chain
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<(String, Arc<dyn RouteHandler>)>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler at the end of the chain
    pub fn push(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), GatewayError> {
        let name = self.check_free(name.into())?;
        self.handlers.push((name, handler));
        Ok(())
    }

    /// Insert a handler directly before `anchor`
    pub fn insert_before(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), GatewayError> {
        let name = self.check_free(name.into())?;
        let index = self.position(anchor)?;
        self.handlers.insert(index, (name, handler));
        Ok(())
    }

    /// Insert a handler directly after `anchor`
    pub fn insert_after(
        &mut self,
        anchor: &str,
        name: impl Into<String>,
        handler: Arc<dyn RouteHandler>,
    ) -> Result<(), GatewayError> {
        let name = self.check_free(name.into())?;
        let index = self.position(anchor)?;
        self.handlers.insert(index + 1, (name, handler));
        Ok(())
    }

    /// Remove a handler, leaving the order of the others intact
    pub fn remove(&mut self, name: &str) -> Result<Arc<dyn RouteHandler>, GatewayError> {
        let index = self.position(name)?;
        Ok(self.handlers.remove(index).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.iter().any(|(n, _)| n == name)
    }

    /// Handler names in dispatch order
    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Run `request` through the chain
    pub async fn dispatch(&self, request: Request) -> Response {
        let context = RouteContext::from_headers(request.headers());
        let mut request = request;

        for (name, handler) in &self.handlers {
            match handler.handle(request, &context).await {
                Flow::Respond(response) => {
                    tracing::trace!("Handler {} answered", name);
                    return response;
                }
                Flow::Continue(next) => request = next,
            }
        }

        tracing::debug!("No handler for {} {}", request.method(), request.uri());
        StatusCode::NOT_FOUND.into_response()
    }

    fn position(&self, name: &str) -> Result<usize, GatewayError> {
        self.handlers
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| GatewayError::UnknownHandler(name.to_string()))
    }

    fn check_free(&self, name: String) -> Result<String, GatewayError> {
        if self.contains(&name) {
            return Err(GatewayError::DuplicateHandler(name));
        }
        Ok(name)
    }
}

/// Extract the `remoteId` cookie from request headers
pub fn session_token(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| SessionId::from(value.trim_matches('"')))
}
