//! Local static directory

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method};
use axum::response::Response;

use super::{Flow, RouteContext, RouteHandler};

/// Serves files below `root` for `GET` and `HEAD`; anything else falls through
pub struct StaticFilesHandler {
    root: PathBuf,
}

impl StaticFilesHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        if path.split(['/', '\\']).any(|segment| segment == "..") {
            return None;
        }
        let relative = path.trim_start_matches('/');
        let mut file = self.root.join(relative);
        if relative.is_empty() || relative.ends_with('/') {
            file.push("index.html");
        }
        Some(file)
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl RouteHandler for StaticFilesHandler {
    async fn handle(&self, request: Request, _context: &RouteContext) -> Flow {
        let method = request.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return Flow::Continue(request);
        }
        let Some(file) = self.resolve(request.uri().path()) else {
            return Flow::Continue(request);
        };

        let contents = match tokio::fs::read(&file).await {
            Ok(contents) => contents,
            Err(_) => return Flow::Continue(request),
        };
        tracing::trace!("Serving {} ({} bytes)", file.display(), contents.len());

        let length = contents.len();
        let body = if method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(contents)
        };
        let mut response = Response::new(body);
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(content_type(&file)),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        Flow::Respond(response)
    }
}
