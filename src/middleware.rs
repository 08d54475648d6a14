//! axum adapter that puts [`validate`] in front of a webhook route.
//!
//! ```ignore
//! let app = Router::new().route(
//!     "/deploy",
//!     post(deploy).route_layer(WebhookGuard::new("team/app", "master")),
//! );
//! ```
//!
//! Requests a guard does not claim go to the service given with
//! [`WebhookGuard::or`], which is how several hooks share one path. Without
//! one they get the router's usual empty 404.

use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde_json::Value;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::address::resolve_client_address;
use crate::validator::{ValidationOutcome, ValidatorConfig, validate};

/// Default cap on buffered webhook bodies (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

pub const SCHEMA_ERROR_BODY: &str = "500 JSON Parser Error";
pub const REPOSITORY_MATCH_BODY: &str = "200 Repository Match";
pub const FULL_MATCH_BODY: &str = "200 OK";

/// Request extension handed to the inner handler on a full match.
#[derive(Debug, Clone)]
pub struct MatchedPush {
    pub delivery_id: Uuid,
    pub repository: String,
    pub branch: String,
    pub source_address: Option<IpAddr>,
    pub received_at: DateTime<Utc>,
}

/// Marks a request a hook did not claim: set on the request handed to the
/// [`WebhookGuard::or`] service, or on the 404 when there is none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteSkipped;

type SkipService = BoxCloneSyncService<Request, Response, Infallible>;

/// Layer validating Bitbucket push webhooks before the wrapped route runs.
#[derive(Clone)]
pub struct WebhookGuard {
    config: Arc<ValidatorConfig>,
    trusted_proxies: Arc<[IpNet]>,
    max_body_bytes: usize,
    skip: Option<SkipService>,
}

impl WebhookGuard {
    pub fn new(repository_name: impl Into<String>, branch_name: impl Into<String>) -> Self {
        Self::from_config(ValidatorConfig::new(repository_name, branch_name))
    }

    pub fn from_config(config: ValidatorConfig) -> Self {
        Self {
            config: Arc::new(config),
            trusted_proxies: Arc::from(Vec::new()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            skip: None,
        }
    }

    pub fn bypass_address_check(mut self, bypass: bool) -> Self {
        Arc::make_mut(&mut self.config).bypass_address_check = bypass;
        self
    }

    /// Proxies whose `X-Forwarded-For` entries are believed.
    pub fn trusted_proxies(mut self, proxies: Vec<IpNet>) -> Self {
        self.trusted_proxies = Arc::from(proxies);
        self
    }

    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Service that receives requests this hook does not apply to.
    pub fn or<T>(mut self, next: T) -> Self
    where
        T: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
        T::Future: Send + 'static,
    {
        self.skip = Some(BoxCloneSyncService::new(next));
        self
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    fn client_address(&self, request: &Request) -> Option<IpAddr> {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let forwarded_for = request
            .headers()
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok());
        resolve_client_address(peer, forwarded_for, &self.trusted_proxies)
    }

    async fn handle<S>(self, request: Request, inner: S) -> Response
    where
        S: Service<Request, Response = Response, Error = Infallible> + Send + 'static,
        S::Future: Send + 'static,
    {
        let client = self.client_address(&request);
        let source_address = client.map(|ip| ip.to_string()).unwrap_or_default();

        let (parts, body) = request.into_parts();
        let bytes = match axum::body::to_bytes(body, self.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not read webhook body from {:?}: {}", client, e);
                return StatusCode::BAD_REQUEST.into_response();
            }
        };
        let json = decode_body(&bytes);

        match validate(&json, &source_address, &self.config) {
            ValidationOutcome::SchemaError(e) => {
                error!(
                    "Webhook for '{}' rejected, is the body JSON? {}",
                    self.config.repository_name, e
                );
                let mut response =
                    (StatusCode::INTERNAL_SERVER_ERROR, SCHEMA_ERROR_BODY).into_response();
                response.extensions_mut().insert(e);
                response
            }
            ValidationOutcome::NotApplicable => {
                debug!(
                    "Request from {:?} is not a push for '{}', skipping route",
                    client, self.config.repository_name
                );
                let Some(skip) = self.skip else {
                    let mut response = StatusCode::NOT_FOUND.into_response();
                    response.extensions_mut().insert(RouteSkipped);
                    return response;
                };
                let mut request = Request::from_parts(parts, Body::from(bytes));
                request.extensions_mut().insert(RouteSkipped);
                match skip.oneshot(request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            }
            ValidationOutcome::RepositoryMatchOnly => {
                warn!(
                    "Push to '{}' did not include branch '{}'",
                    self.config.repository_name, self.config.branch_name
                );
                REPOSITORY_MATCH_BODY.into_response()
            }
            ValidationOutcome::FullMatch => {
                let push = MatchedPush {
                    delivery_id: Uuid::now_v7(),
                    repository: self.config.repository_name.clone(),
                    branch: self.config.branch_name.clone(),
                    source_address: client,
                    received_at: Utc::now(),
                };
                info!(
                    "Delivery {} matched '{}' branch '{}'",
                    push.delivery_id, push.repository, push.branch
                );

                let mut request = Request::from_parts(parts, Body::from(bytes));
                request.extensions_mut().insert(push.clone());

                // The hook answers right away; the route runs on its own task.
                tokio::spawn(async move {
                    let response = match inner.oneshot(request).await {
                        Ok(response) => response,
                        Err(never) => match never {},
                    };
                    debug!(
                        "Handler for delivery {} finished with {}",
                        push.delivery_id,
                        response.status()
                    );
                });

                FULL_MATCH_BODY.into_response()
            }
        }
    }
}

/// Bodies that are not JSON are passed on as a string so the schema check
/// rejects them.
fn decode_body(bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

impl<S> Layer<S> for WebhookGuard {
    type Service = WebhookGuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        WebhookGuardService {
            inner,
            guard: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct WebhookGuardService<S> {
    inner: S,
    guard: WebhookGuard,
}

impl<S> Service<Request> for WebhookGuardService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The route is driven with `oneshot`, which waits for readiness itself.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let inner = self.inner.clone();
        let guard = self.guard.clone();
        Box::pin(async move { Ok(guard.handle(request, inner).await) })
    }
}
