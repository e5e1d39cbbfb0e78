//! `/remote/status`, answered locally for every method

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::{Flow, RouteContext, RouteHandler};
use crate::registry::ConnectionRegistry;

pub const STATUS_PATH: &str = "/remote/status";

#[derive(Debug, Serialize)]
struct StatusBody {
    alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

/// Reports whether the caller's session is alive. Never forwards.
pub struct StatusHandler {
    registry: Arc<ConnectionRegistry>,
}

impl StatusHandler {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl RouteHandler for StatusHandler {
    async fn handle(&self, request: Request, context: &RouteContext) -> Flow {
        if request.uri().path() != STATUS_PATH {
            return Flow::Continue(request);
        }
        if request.method() != Method::GET && request.method() != Method::HEAD {
            return Flow::Respond(
                (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET, HEAD")]).into_response(),
            );
        }

        let session = context
            .token
            .as_ref()
            .and_then(|id| self.registry.get_connection(id));

        let body = match session {
            Some(session) => StatusBody {
                alive: true,
                name: Some(session.descriptor.label.clone()),
                kind: Some(session.descriptor.kind.clone()),
            },
            None => StatusBody {
                alive: false,
                name: None,
                kind: None,
            },
        };
        Flow::Respond(Json(body).into_response())
    }
}
