//! Credential Store — durable principal → delegated-credential persistence.
//!
//! One record per principal, upsert semantics. Expiry is evaluated at read
//! time by the caller; the store itself never sweeps.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CredentialRecord {
    pub user_id: Uuid,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub scopes: Vec<String>,
    pub provider_username: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp < now)
    }
}

#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<CredentialRecord>>;

    /// Upsert keyed by `user_id`. Concurrent writers serialize to
    /// last-writer-wins; a principal never holds more than one record.
    async fn upsert(&self, record: CredentialRecord) -> anyhow::Result<CredentialRecord>;

    /// Idempotent: deleting an absent record is not an error.
    async fn delete(&self, user_id: Uuid) -> anyhow::Result<()>;
}
