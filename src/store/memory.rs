use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{CredentialRecord, CredentialStore};

/// In-memory credential store. Used by tests and `serve --in-memory`.
#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<Uuid, CredentialRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CredentialStore for MemoryStore {
    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<CredentialRecord>> {
        Ok(self.records.get(&user_id).map(|r| r.clone()))
    }

    async fn upsert(&self, mut record: CredentialRecord) -> anyhow::Result<CredentialRecord> {
        record.updated_at = Utc::now();
        // entry() holds the shard lock, so concurrent upserts for one
        // principal serialize to last-writer-wins.
        let stored = self
            .records
            .entry(record.user_id)
            .and_modify(|existing| {
                record.created_at = existing.created_at;
                *existing = record.clone();
            })
            .or_insert(record);
        Ok(stored.clone())
    }

    async fn delete(&self, user_id: Uuid) -> anyhow::Result<()> {
        self.records.remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(user_id: Uuid, token: &str) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            user_id,
            access_token: token.to_string(),
            refresh_token: None,
            scopes: vec!["repo".into(), "user".into(), "read:org".into()],
            provider_username: Some("octocat".into()),
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.upsert(record(id, "gho_abc123")).await.unwrap();

        let found = store.get(id).await.unwrap().unwrap();
        assert_eq!(found.access_token, "gho_abc123");
        assert_eq!(found.provider_username.as_deref(), Some("octocat"));
    }

    #[tokio::test]
    async fn upsert_overwrites_instead_of_duplicating() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store.upsert(record(id, "gho_first")).await.unwrap();
        store.upsert(record(id, "gho_second")).await.unwrap();

        assert_eq!(store.records.len(), 1);
        let found = store.get(id).await.unwrap().unwrap();
        assert_eq!(found.access_token, "gho_second");
    }

    #[tokio::test]
    async fn concurrent_upserts_leave_exactly_one_record() {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.upsert(record(id, &format!("gho_{}", i))).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(store.records.len(), 1);
        let found = store.get(id).await.unwrap().unwrap();
        assert!(found.access_token.starts_with("gho_"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        store.delete(id).await.unwrap();
        store.upsert(record(id, "gho_tok")).await.unwrap();
        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();

        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expiry_is_evaluated_at_read_time() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let mut rec = record(id, "gho_stale");
        rec.expires_at = Some(Utc::now() - chrono::Duration::minutes(5));
        store.upsert(rec).await.unwrap();

        // The store still returns the record; staleness is the caller's call.
        let found = store.get(id).await.unwrap().unwrap();
        assert!(found.is_expired(Utc::now()));
    }
}
