use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::hosting::HostingError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or invalid session")]
    Unauthenticated,

    #[error("no stored credential for the hosting provider")]
    CredentialNotFound,

    #[error("hosting-provider credential has expired")]
    CredentialExpired,

    #[error("hosting-provider token not found; authenticate with the provider first")]
    ProviderTokenMissing,

    #[error("insufficient permission (granted scopes: {scopes})")]
    InsufficientScope { scopes: String },

    #[error("{0}")]
    NameConflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<HostingError> for AppError {
    fn from(err: HostingError) -> Self {
        match err {
            HostingError::Unauthorized => AppError::CredentialExpired,
            HostingError::Forbidden { scopes } => AppError::InsufficientScope { scopes },
            HostingError::NameConflict(msg) => AppError::NameConflict(msg),
            HostingError::Api { status, message } => {
                AppError::Upstream(format!("provider API error (status {}): {}", status, message))
            }
            HostingError::Transport(e) => AppError::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "unauthenticated",
                "missing or invalid session".to_string(),
            ),
            AppError::CredentialNotFound => (
                StatusCode::NOT_FOUND,
                "credential_error",
                "credential_not_found",
                "no stored credential for the hosting provider".to_string(),
            ),
            AppError::CredentialExpired => (
                StatusCode::UNAUTHORIZED,
                "credential_error",
                "credential_expired",
                "hosting-provider credential is invalid or expired; reconnect your account"
                    .to_string(),
            ),
            AppError::ProviderTokenMissing => (
                StatusCode::UNAUTHORIZED,
                "credential_error",
                "credential_absent",
                "hosting-provider token not found; authenticate with the provider first"
                    .to_string(),
            ),
            AppError::InsufficientScope { scopes } => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "insufficient_scope",
                format!("insufficient permission (granted scopes: {})", scopes),
            ),
            AppError::NameConflict(m) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_request_error",
                "name_conflict",
                m.clone(),
            ),
            AppError::Validation(m) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                m.clone(),
            ),
            AppError::Upstream(e) => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_failed",
                e.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
