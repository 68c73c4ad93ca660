use sqlx::PgPool;
use uuid::Uuid;

use super::{CredentialRecord, CredentialStore};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CredentialStore for PgStore {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<CredentialRecord>> {
        let row = sqlx::query_as::<_, CredentialRecord>(
            r#"SELECT user_id, access_token, refresh_token, scopes, provider_username,
                      expires_at, created_at, updated_at
               FROM provider_credentials WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert(&self, record: CredentialRecord) -> anyhow::Result<CredentialRecord> {
        // The PRIMARY KEY on user_id plus ON CONFLICT makes concurrent upserts
        // serialize to last-writer-wins without duplicate rows.
        let stored = sqlx::query_as::<_, CredentialRecord>(
            r#"INSERT INTO provider_credentials
                   (user_id, access_token, refresh_token, scopes, provider_username, expires_at,
                    created_at, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
               ON CONFLICT (user_id) DO UPDATE SET
                   access_token = EXCLUDED.access_token,
                   refresh_token = EXCLUDED.refresh_token,
                   scopes = EXCLUDED.scopes,
                   provider_username = EXCLUDED.provider_username,
                   expires_at = EXCLUDED.expires_at,
                   updated_at = NOW()
               RETURNING user_id, access_token, refresh_token, scopes, provider_username,
                         expires_at, created_at, updated_at"#,
        )
        .bind(record.user_id)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(&record.scopes)
        .bind(&record.provider_username)
        .bind(record.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn delete(&self, user_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM provider_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
