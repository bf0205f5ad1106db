//! Notification fan-out and presence service for the extension-project portal.
//!
//! The binary in `main.rs` is a thin wrapper; everything a test needs to
//! stand up the full HTTP + WebSocket surface is reachable from here.

pub mod api;
pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod notification;
pub mod realtime;
pub mod store;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue, Method},
    middleware::Next,
    response::Response,
    routing::get,
    Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use notification::email::EmailChannel;
use notification::service::NotificationService;
use realtime::broadcast::Broadcaster;
use realtime::presence::PresenceRegistry;
use store::{NotificationStore, ProjectDirectory};

/// Request bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 64 * 1024;

const MAX_IN_FLIGHT_REQUESTS: usize = 1024;

/// Shared application state passed to handlers and the socket endpoint.
pub struct AppState {
    pub notifications: NotificationService,
    pub presence: PresenceRegistry,
    pub broadcaster: Broadcaster,
    pub config: config::Config,
}

impl AppState {
    /// Wire the service graph around a store and a project directory.
    pub fn new(
        config: config::Config,
        store: Arc<dyn NotificationStore>,
        directory: Arc<dyn ProjectDirectory>,
        email: EmailChannel,
    ) -> Self {
        let broadcaster = Broadcaster::new(config.broadcast_capacity);
        let notifications = NotificationService::new(
            store,
            directory,
            broadcaster.clone(),
            email,
            config.base_url.clone(),
        );
        Self {
            notifications,
            presence: PresenceRegistry::new(broadcaster.clone()),
            broadcaster,
            config,
        }
    }
}

/// The full router: REST, socket, health, and the middleware stack.
pub fn app(state: Arc<AppState>) -> Router {
    let allowed_origin = state.config.allowed_origin.clone();
    let x_request_id = HeaderName::from_static("x-request-id");

    Router::new()
        .route("/healthz", get(health_check))
        .route("/ws", get(realtime::socket::ws_handler))
        .merge(api::api_router())
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
                    let origin = origin.to_str().unwrap_or("");
                    origin == allowed_origin
                        || origin.starts_with("http://localhost:")
                        || origin.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    x_request_id.clone(),
                ])
                .allow_credentials(true),
        )
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(ConcurrencyLimitLayer::new(MAX_IN_FLIGHT_REQUESTS))
}

async fn health_check() -> &'static str {
    "ok"
}

/// Hardening headers on every response.
async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.remove("server");

    resp
}
