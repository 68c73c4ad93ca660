//! HTTP API surface: credential custody, OAuth callback, provisioning, and
//! the progress websocket.

pub mod callback;
pub mod credentials;
pub mod provision;
pub mod ws;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use uuid::Uuid;

use crate::errors::AppError;
use crate::AppState;

/// Authenticated principal, attached by the session middleware.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: Uuid,
    pub email: Option<String>,
}

pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/credential",
            get(credentials::get_credential)
                .put(credentials::put_credential)
                .delete(credentials::delete_credential),
        )
        .route("/repositories", post(provision::create_repository))
        .layer(middleware::from_fn_with_state(state, session_auth))
}

/// Resolve the bearer token to a principal, or reject the request.
pub async fn session_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthenticated)?
        .to_string();

    let session = state
        .identity
        .get_session(&bearer)
        .await
        .map_err(|e| AppError::Upstream(format!("identity lookup failed: {e}")))?
        .ok_or(AppError::Unauthenticated)?;

    request.extensions_mut().insert(CurrentUser {
        id: session.user_id,
        email: session.email,
    });
    Ok(next.run(request).await)
}
