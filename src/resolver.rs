//! Credential resolution — decide which delegated token a provisioning run
//! uses, preferring the session-embedded token (fresh from a redirect) over
//! the custody copy.

use std::sync::Arc;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hosting::is_provider_token;
use crate::identity::Session;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub token: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CredentialLookup {
    Found(StoredCredential),
    Absent,
    Expired,
}

#[derive(Debug, Clone, Serialize)]
pub struct PutCredential {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub username: Option<String>,
}

/// Client-side port to the custody endpoints.
#[async_trait::async_trait]
pub trait CustodyApi: Send + Sync {
    async fn get_credential(&self, session_token: &str) -> anyhow::Result<CredentialLookup>;
    async fn put_credential(
        &self,
        session_token: &str,
        credential: PutCredential,
    ) -> anyhow::Result<()>;
    /// Idempotent; used on disconnect and sign-out.
    async fn delete_credential(&self, session_token: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    SessionEmbedded,
    Stored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved {
        token: String,
        source: CredentialSource,
    },
    /// No usable credential anywhere; the user must re-consent.
    Absent,
}

/// Resolve a usable delegated token for this session.
///
/// A session-embedded token wins when it looks like a provider token and the
/// login actually came from the hosting provider. It is also pushed to
/// custody in the background so it survives the session; that write is
/// best-effort and never blocks the run.
pub async fn resolve(
    session: &Session,
    custody: Arc<dyn CustodyApi>,
) -> anyhow::Result<Resolution> {
    if let Some(token) = &session.provider_token {
        if is_provider_token(token) && session.logged_in_with_hosting_provider() {
            let put = PutCredential {
                access_token: token.clone(),
                refresh_token: session.provider_refresh_token.clone(),
                expires_at: session.expires_at,
                username: session.provider_username.clone(),
            };
            let session_token = session.access_token.clone();
            tokio::spawn(async move {
                if let Err(e) = custody.put_credential(&session_token, put).await {
                    tracing::warn!(error = %e, "background credential persist failed");
                }
            });
            return Ok(Resolution::Resolved {
                token: token.clone(),
                source: CredentialSource::SessionEmbedded,
            });
        }
        tracing::debug!("session token failed shape or provider check, falling back to custody");
    }

    match custody.get_credential(&session.access_token).await? {
        CredentialLookup::Found(stored) => Ok(Resolution::Resolved {
            token: stored.token,
            source: CredentialSource::Stored,
        }),
        CredentialLookup::Absent | CredentialLookup::Expired => Ok(Resolution::Absent),
    }
}

// ── HTTP implementation ──────────────────────────────────────

pub struct HttpCustody {
    base_url: String,
    client: reqwest::Client,
}

impl HttpCustody {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CredentialWire {
    token: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorWire {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
}

#[async_trait::async_trait]
impl CustodyApi for HttpCustody {
    async fn get_credential(&self, session_token: &str) -> anyhow::Result<CredentialLookup> {
        let resp = self
            .client
            .get(format!("{}/api/v1/credential", self.base_url))
            .bearer_auth(session_token)
            .send()
            .await?;

        match resp.status().as_u16() {
            200 => {
                let wire: CredentialWire = resp.json().await?;
                Ok(CredentialLookup::Found(StoredCredential {
                    token: wire.token,
                    username: wire.username,
                }))
            }
            404 => Ok(CredentialLookup::Absent),
            401 => {
                let body: Result<ErrorWire, _> = resp.json().await;
                match body {
                    Ok(wire) if wire.error.code.as_deref() == Some("credential_expired") => {
                        Ok(CredentialLookup::Expired)
                    }
                    _ => bail!("custody lookup rejected the session"),
                }
            }
            s => bail!("custody lookup failed (status {})", s),
        }
    }

    async fn put_credential(
        &self,
        session_token: &str,
        credential: PutCredential,
    ) -> anyhow::Result<()> {
        let resp = self
            .client
            .put(format!("{}/api/v1/credential", self.base_url))
            .bearer_auth(session_token)
            .json(&credential)
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("custody store failed (status {})", resp.status());
        }
        Ok(())
    }

    async fn delete_credential(&self, session_token: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .delete(format!("{}/api/v1/credential", self.base_url))
            .bearer_auth(session_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            bail!("custody delete failed (status {})", resp.status());
        }
        Ok(())
    }
}
