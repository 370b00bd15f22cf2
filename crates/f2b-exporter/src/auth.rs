//! Basic Auth and access logging middleware.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use tracing::{debug, info, warn};

// ============================================================
// Access log layer (tower Layer + Service)
// ============================================================

/// Logs one line per request once the response is ready.
///
/// Failed or rejected requests log at warn, successful `/health` checks at
/// debug, everything else at info.
#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

/// Authenticated username, attached to the response by the auth middleware.
#[derive(Clone)]
pub(crate) struct AuthUser(pub(crate) String);

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
}

/// Per-request fields captured before the request is handed on.
struct AccessEntry {
    method: Method,
    path: String,
    client: String,
    started: Instant,
}

impl AccessEntry {
    fn new(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            path: req.uri().path().to_owned(),
            client: req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map_or_else(|| "-".to_owned(), |ci| ci.0.ip().to_string()),
            started: Instant::now(),
        }
    }

    fn finish(self, response: &Response) {
        let Self {
            method,
            path,
            client,
            started,
        } = self;
        let latency_ms = started.elapsed().as_millis() as u64;
        let status = response.status().as_u16();
        let bytes = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        let user = response
            .extensions()
            .get::<AuthUser>()
            .map_or("-", |u| u.0.as_str());

        if status >= 400 {
            warn!(client, user, status, latency_ms, bytes, "{method} {path}");
        } else if path == "/health" {
            debug!(client, user, status, latency_ms, "{method} {path}");
        } else {
            info!(client, user, status, latency_ms, bytes, "{method} {path}");
        }
    }
}

impl<S> tower::Service<Request> for AccessLogService<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let entry = AccessEntry::new(&req);
        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            entry.finish(&response);
            Ok(response)
        })
    }
}

// ============================================================
// Basic Auth middleware
// ============================================================

/// Configured username and password.
pub(crate) type Credentials = Arc<(String, String)>;

/// Extracts `user:password` from an `Authorization: Basic ...` header value.
fn decode_basic(header_value: &str) -> Result<(String, String), &'static str> {
    let encoded = header_value
        .strip_prefix("Basic ")
        .ok_or("not basic auth")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| "invalid base64")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "invalid utf8")?;
    let (user, pass) = decoded.split_once(':').ok_or("malformed credentials")?;
    Ok((user.to_owned(), pass.to_owned()))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"f2b-exporter\"")],
        "Unauthorized",
    )
        .into_response()
}

pub(crate) async fn basic_auth_middleware(
    State(creds): State<Credentials>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();

    let auth_str = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => match v.to_str() {
            Ok(s) => s,
            Err(_) => {
                warn!(path = %path, "auth failed: invalid header encoding");
                return unauthorized();
            }
        },
        None => {
            warn!(path = %path, "auth failed: no authorization header");
            return unauthorized();
        }
    };

    let (user, pass) = match decode_basic(auth_str) {
        Ok(pair) => pair,
        Err(reason) => {
            warn!(path = %path, "auth failed: {}", reason);
            return unauthorized();
        }
    };

    if user != creds.0 || pass != creds.1 {
        warn!(user = %user, path = %path, "auth failed: invalid credentials");
        return unauthorized();
    }

    debug!(user = %user, path = %path, "authenticated");
    let mut response = next.run(req).await;
    response.extensions_mut().insert(AuthUser(user));
    response
}
