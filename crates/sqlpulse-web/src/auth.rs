//! Basic Auth and access logging middleware.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use tracing::{debug, info, warn};

/// Paths served without credentials so load balancers can probe liveness.
const PUBLIC_PATHS: &[&str] = &["/api/v1/health"];

/// Swagger UI assets and the OpenAPI document.
const DOCS_PREFIXES: &[&str] = &["/swagger-ui", "/api-docs/"];

fn is_docs_path(path: &str) -> bool {
    DOCS_PREFIXES.iter().any(|prefix| path.starts_with(prefix))
}

// ============================================================
// Access log layer (tower Layer + Service)
// ============================================================

#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

/// Authenticated username, inserted into request extensions by auth middleware.
#[derive(Clone)]
pub(crate) struct AuthUser(pub(crate) String);

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
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
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let client = req
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "-".to_owned());
        let user = req
            .extensions()
            .get::<AuthUser>()
            .map(|u| u.0.clone())
            .unwrap_or_else(|| "-".to_owned());
        let t0 = Instant::now();

        let docs = is_docs_path(&path);

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let latency_ms = t0.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            if docs {
                debug!(client, status, "{method} {path}");
            } else if response.status().is_server_error() {
                warn!(client, user, status, latency_ms, "{method} {path}");
            } else {
                info!(client, user, status, latency_ms, "{method} {path}");
            }
            Ok(response)
        })
    }
}

// ============================================================
// Basic Auth middleware
// ============================================================

/// Expected username and password.
pub(crate) type Credentials = Arc<(String, String)>;

/// Why a request's `Authorization` header was rejected.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AuthRejection {
    NotBasic,
    InvalidBase64,
    InvalidUtf8,
    Malformed,
}

impl AuthRejection {
    fn as_str(&self) -> &'static str {
        match self {
            AuthRejection::NotBasic => "not basic auth",
            AuthRejection::InvalidBase64 => "invalid base64",
            AuthRejection::InvalidUtf8 => "invalid utf8",
            AuthRejection::Malformed => "malformed credentials",
        }
    }
}

/// Decodes a `Basic <base64(user:password)>` header value.
pub(crate) fn parse_basic_credentials(value: &str) -> Result<(String, String), AuthRejection> {
    let encoded = value
        .strip_prefix("Basic ")
        .ok_or(AuthRejection::NotBasic)?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthRejection::InvalidBase64)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthRejection::InvalidUtf8)?;
    let (user, pass) = decoded.split_once(':').ok_or(AuthRejection::Malformed)?;
    Ok((user.to_owned(), pass.to_owned()))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"sqlpulse\"")],
        Body::from("Unauthorized"),
    )
        .into_response()
}

pub(crate) async fn basic_auth_middleware(
    State(creds): State<Credentials>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    if PUBLIC_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }

    let Some(auth_header) = req.headers().get(header::AUTHORIZATION) else {
        warn!(path = %path, "auth failed: no authorization header");
        return unauthorized();
    };

    let Ok(auth_str) = auth_header.to_str() else {
        warn!(path = %path, "auth failed: invalid header encoding");
        return unauthorized();
    };

    let (user, pass) = match parse_basic_credentials(auth_str) {
        Ok(pair) => pair,
        Err(rejection) => {
            warn!(path = %path, "auth failed: {}", rejection.as_str());
            return unauthorized();
        }
    };

    if user != creds.0 || pass != creds.1 {
        warn!(user = %user, path = %path, "auth failed: invalid credentials");
        return unauthorized();
    }

    debug!(user = %user, path = %path, "authenticated");
    req.extensions_mut().insert(AuthUser(user));
    next.run(req).await
}
