//! launchpad — repository provisioning with delegated credential custody.
//!
//! Exchanges OAuth logins for delegated hosting-provider tokens, keeps them
//! in custody across sessions, and drives repository provisioning runs with
//! live progress over websockets. Project drafts survive the consent
//! redirect and interrupted runs resume on their own.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

pub mod api;
pub mod config;
pub mod draft;
pub mod errors;
pub mod hosting;
pub mod identity;
pub mod orchestrator;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod store;

use hosting::RepoClient;
use identity::IdentityProvider;
use progress::ProgressBroker;
use store::CredentialStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub repos: RepoClient,
    pub broker: ProgressBroker,
    pub config: config::Config,
}

pub fn app(state: Arc<AppState>) -> Router {
    let dashboard_origin = state.config.dashboard_origin.clone();

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/auth/callback", get(api::callback::oauth_callback))
        .route("/ws/:user_id", get(api::ws::progress_socket))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer({
            use axum::http::{HeaderName, Method};
            use tower_http::cors::AllowOrigin;
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(move |origin, _| {
                    let origin_str = origin.to_str().unwrap_or("");
                    origin_str == dashboard_origin
                        || origin_str.starts_with("http://localhost:")
                        || origin_str.starts_with("http://127.0.0.1:")
                }))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                // AllowHeaders::any() is incompatible with allow_credentials(true).
                .allow_headers([
                    HeaderName::from_static("content-type"),
                    HeaderName::from_static("authorization"),
                    HeaderName::from_static("x-github-token"),
                    HeaderName::from_static("x-request-id"),
                ])
                .allow_credentials(true)
        })
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

/// Injects a unique X-Request-Id into every response so clients can
/// correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Injects security headers into every response. Responses here carry
/// delegated tokens, so nothing may be cached or framed.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-XSS-Protection", "1; mode=block".parse().unwrap());
    headers.insert("Cache-Control", "no-store".parse().unwrap());
    headers.insert("Referrer-Policy", "no-referrer".parse().unwrap());
    headers.insert(
        "Permissions-Policy",
        "camera=(), microphone=(), geolocation=()".parse().unwrap(),
    );
    headers.remove("Server");

    resp
}
