//! Credential custody endpoints. The delegated token never appears in any
//! response except the explicit GET here; log lines carry only the principal.

use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::errors::AppError;
use crate::hosting::REQUIRED_SCOPES;
use crate::store::CredentialRecord;
use crate::AppState;

use super::CurrentUser;

pub async fn get_credential(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state
        .store
        .get(user.id)
        .await?
        .ok_or(AppError::CredentialNotFound)?;

    if record.is_expired(Utc::now()) {
        tracing::info!(user_id = %user.id, "stored credential expired");
        return Err(AppError::CredentialExpired);
    }

    Ok(Json(json!({
        "token": record.access_token,
        "username": record.provider_username,
    })))
}

#[derive(Debug, Deserialize)]
pub struct PutCredentialBody {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub username: Option<String>,
}

pub async fn put_credential(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<PutCredentialBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let now = Utc::now();
    state
        .store
        .upsert(CredentialRecord {
            user_id: user.id,
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            scopes: REQUIRED_SCOPES.iter().map(|s| s.to_string()).collect(),
            provider_username: body.username,
            expires_at: body.expires_at,
            created_at: now,
            updated_at: now,
        })
        .await?;

    tracing::info!(user_id = %user.id, "stored delegated credential");
    Ok(Json(json!({ "success": true })))
}

pub async fn delete_credential(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.delete(user.id).await?;
    tracing::info!(user_id = %user.id, "deleted delegated credential");
    Ok(Json(json!({ "success": true })))
}
