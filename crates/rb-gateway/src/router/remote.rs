//! Session forwarding
//!
//! Requests carrying the cookie of a live session are sent to that session's
//! proxy listener. Plain HTTP goes through a non-pooling client; WebSocket
//! upgrades get a second upstream connection and a message relay.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{Flow, RouteContext, RouteHandler};
use crate::error::GatewayError;
use crate::proxy::{ProxyLease, ProxyTable};
use crate::registry::ConnectionRegistry;

type Upstream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if !is_hop_by_hop(name) && name != header::HOST {
            to.append(name.clone(), value.clone());
        }
    }
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    upgrade && connection
}

fn bad_gateway(message: impl std::fmt::Display) -> Flow {
    Flow::Respond((StatusCode::BAD_GATEWAY, message.to_string()).into_response())
}

/// Forwards requests of live sessions to their proxy listener
pub struct RemoteProxyHandler {
    registry: Arc<ConnectionRegistry>,
    proxies: Arc<ProxyTable>,
    client: reqwest::Client,
}

impl RemoteProxyHandler {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        proxies: Arc<ProxyTable>,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self {
            registry,
            proxies,
            client,
        })
    }

    async fn forward_http(&self, request: Request, lease: ProxyLease) -> Flow {
        let (parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        let url = format!("http://127.0.0.1:{}{}", lease.port(), path);
        tracing::debug!("Forwarding {} {}", parts.method, url);

        let mut headers = HeaderMap::new();
        copy_headers(&parts.headers, &mut headers);
        let upstream = self
            .client
            .request(parts.method, &url)
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await;

        let upstream = match upstream {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Forward to {} failed: {}", url, e);
                return bad_gateway(e);
            }
        };

        let status = upstream.status();
        let mut response_headers = HeaderMap::new();
        copy_headers(upstream.headers(), &mut response_headers);

        // The lease lives as long as the response body is being streamed
        let stream = upstream.bytes_stream().map(move |chunk| {
            let _ = &lease;
            chunk
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Flow::Respond(response)
    }

    async fn relay_websocket(&self, request: Request, lease: ProxyLease) -> Flow {
        let (mut parts, _body) = request.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return Flow::Respond(rejection.into_response()),
        };

        let upstream = match connect_upstream(&parts, lease.port()).await {
            Ok(upstream) => upstream,
            Err(e) => {
                tracing::warn!("WebSocket upstream on port {} failed: {}", lease.port(), e);
                return bad_gateway(e);
            }
        };

        tracing::debug!("Relaying WebSocket {} via port {}", parts.uri, lease.port());
        Flow::Respond(upgrade.on_upgrade(move |socket| relay(socket, upstream, lease)))
    }
}

#[async_trait]
impl RouteHandler for RemoteProxyHandler {
    async fn handle(&self, request: Request, context: &RouteContext) -> Flow {
        let Some(token) = context.token.as_ref() else {
            return Flow::Continue(request);
        };
        let Some(session) = self.registry.get_connection(token) else {
            tracing::debug!("Stale session token {}", token);
            return Flow::Continue(request);
        };

        let lease = match self.proxies.acquire(&session) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!("No proxy listener for session {}: {}", session.id, e);
                return bad_gateway(e);
            }
        };

        if is_websocket_upgrade(request.headers()) {
            self.relay_websocket(request, lease).await
        } else {
            self.forward_http(request, lease).await
        }
    }
}

async fn connect_upstream(
    parts: &Parts,
    port: u16,
) -> Result<Upstream, tokio_tungstenite::tungstenite::Error> {
    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let mut request = format!("ws://127.0.0.1:{}{}", port, path).into_client_request()?;

    for name in [header::COOKIE, header::SEC_WEBSOCKET_PROTOCOL, header::ORIGIN] {
        for value in parts.headers.get_all(&name) {
            request.headers_mut().append(name.clone(), value.clone());
        }
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

fn to_upstream(message: ws::Message) -> Option<Message> {
    match message {
        ws::Message::Text(text) => Some(Message::Text(text)),
        ws::Message::Binary(data) => Some(Message::Binary(data)),
        ws::Message::Close(frame) => Some(Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason,
        }))),
        ws::Message::Ping(_) | ws::Message::Pong(_) => None,
    }
}

fn to_client(message: Message) -> Option<ws::Message> {
    match message {
        Message::Text(text) => Some(ws::Message::Text(text)),
        Message::Binary(data) => Some(ws::Message::Binary(data)),
        Message::Close(frame) => Some(ws::Message::Close(frame.map(|f| ws::CloseFrame {
            code: u16::from(f.code),
            reason: f.reason,
        }))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

/// Pump messages both ways until either side closes, then close both
async fn relay(client: WebSocket, upstream: Upstream, lease: ProxyLease) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let Some(message) = to_upstream(message) else {
                continue;
            };
            let closing = matches!(message, Message::Close(_));
            if upstream_tx.send(message).await.is_err() || closing {
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let Some(message) = to_client(message) else {
                continue;
            };
            let closing = matches!(message, ws::Message::Close(_));
            if client_tx.send(message).await.is_err() || closing {
                break;
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }

    let _ = upstream_tx.close().await;
    let _ = client_tx.close().await;
    tracing::debug!("WebSocket relay via port {} finished", lease.port());
}
