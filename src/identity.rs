//! Identity collaborator — a black box exposing "exchange code for session"
//! and "get current session". The provider token embedded in a freshly
//! exchanged session is valid only for that redirect cycle; whoever receives
//! it must persist it or it is lost.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::retry::{retry, RetryPolicy};

/// Provider-of-record value the hosting provider's logins carry.
pub const HOSTING_PROVIDER: &str = "github";

#[derive(Debug, Clone)]
pub struct Session {
    /// The primary-session bearer token.
    pub access_token: String,
    pub user_id: Uuid,
    pub email: Option<String>,
    /// Provider-of-record for this login (e.g. "github").
    pub provider: Option<String>,
    /// Delegated provider token; present only right after an OAuth redirect.
    pub provider_token: Option<String>,
    pub provider_refresh_token: Option<String>,
    pub provider_username: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn logged_in_with_hosting_provider(&self) -> bool {
        self.provider.as_deref() == Some(HOSTING_PROVIDER)
    }
}

/// Server-side port to the identity collaborator.
#[async_trait::async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange an authorization code for a primary session.
    async fn exchange_code(&self, code: &str) -> anyhow::Result<Session>;

    /// Resolve a bearer token to its session, or None if unrecognized.
    async fn get_session(&self, bearer: &str) -> anyhow::Result<Option<Session>>;
}

/// Client-side view of "do I currently have a live session?".
#[async_trait::async_trait]
pub trait SessionSource: Send + Sync {
    async fn current(&self) -> anyhow::Result<Option<Session>>;
}

/// Poll for a session after an identity redirect: the identity collaborator
/// may need a beat to commit it. Bounded at 10 polls of 200ms; returns None
/// if nothing materializes.
pub async fn await_session(source: &dyn SessionSource) -> Option<Session> {
    retry(RetryPolicy::session_poll(), "session establishment", || async move {
        match source.current().await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(anyhow!("no session yet")),
            Err(e) => Err(e),
        }
    })
    .await
    .ok()
}

/// Build the authorization URL for a fresh hosting-provider consent round.
/// Requests the fixed scope superset; `force_consent` makes the provider
/// re-display its consent screen, needed when a prior grant was
/// under-scoped.
pub fn consent_url(identity_base: &str, redirect_to: &str, force_consent: bool) -> String {
    let scopes = crate::hosting::REQUIRED_SCOPES.join(" ");
    let mut url = format!(
        "{}/auth/v1/authorize?provider={}&redirect_to={}&scopes={}",
        identity_base.trim_end_matches('/'),
        HOSTING_PROVIDER,
        urlencoding::encode(redirect_to),
        urlencoding::encode(&scopes),
    );
    if force_consent {
        url.push_str("&prompt=consent");
    }
    url
}

// ── HTTP implementation ──────────────────────────────────────

pub struct HttpIdentity {
    base_url: String,
    client: reqwest::Client,
}

impl HttpIdentity {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionWire {
    access_token: String,
    provider_token: Option<String>,
    provider_refresh_token: Option<String>,
    /// Unix seconds.
    expires_at: Option<i64>,
    user: UserWire,
}

#[derive(Debug, Deserialize)]
struct UserWire {
    id: Uuid,
    email: Option<String>,
    #[serde(default)]
    app_metadata: AppMetadata,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct AppMetadata {
    provider: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    user_name: Option<String>,
    preferred_username: Option<String>,
}

fn session_from_wire(wire: SessionWire) -> Session {
    let username = wire
        .user
        .user_metadata
        .user_name
        .or(wire.user.user_metadata.preferred_username);
    Session {
        access_token: wire.access_token,
        user_id: wire.user.id,
        email: wire.user.email,
        provider: wire.user.app_metadata.provider,
        provider_token: wire.provider_token,
        provider_refresh_token: wire.provider_refresh_token,
        provider_username: username,
        expires_at: wire.expires_at.and_then(|s| DateTime::from_timestamp(s, 0)),
    }
}

#[async_trait::async_trait]
impl IdentityProvider for HttpIdentity {
    async fn exchange_code(&self, code: &str) -> anyhow::Result<Session> {
        let url = format!(
            "{}/auth/v1/token?grant_type=authorization_code",
            self.base_url
        );
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "auth_code": code }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("code exchange failed (status {}): {}", status, body));
        }

        let wire: SessionWire = resp.json().await?;
        Ok(session_from_wire(wire))
    }

    async fn get_session(&self, bearer: &str) -> anyhow::Result<Option<Session>> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self.client.get(&url).bearer_auth(bearer).send().await?;

        match resp.status() {
            s if s.is_success() => {
                let user: UserWire = resp.json().await?;
                Ok(Some(session_from_wire(SessionWire {
                    access_token: bearer.to_string(),
                    // An existing session never re-surfaces the provider
                    // token; it only travels in the redirect-cycle exchange.
                    provider_token: None,
                    provider_refresh_token: None,
                    expires_at: None,
                    user,
                })))
            }
            reqwest::StatusCode::UNAUTHORIZED
            | reqwest::StatusCode::FORBIDDEN
            | reqwest::StatusCode::NOT_FOUND => Ok(None),
            s => Err(anyhow!("session lookup failed (status {})", s)),
        }
    }
}
