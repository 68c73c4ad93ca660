//! Hosting provider client — repository creation and content seeding against
//! the provider's REST API.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shapes a delegated token for this provider can take.
pub const TOKEN_PREFIXES: [&str; 3] = ["gho_", "ghp_", "github_pat_"];

/// Scope superset requested at consent time. Recorded verbatim alongside
/// stored credentials; the provider is the authority on what a token can do.
pub const REQUIRED_SCOPES: [&str; 3] = ["repo", "user", "read:org"];

/// Cheap shape check used before trusting a session-embedded token.
pub fn is_provider_token(token: &str) -> bool {
    TOKEN_PREFIXES.iter().any(|p| token.starts_with(p))
}

#[derive(Debug, Error)]
pub enum HostingError {
    /// The delegated token was rejected outright.
    #[error("provider rejected the token")]
    Unauthorized,

    /// The token is valid but lacks scope; carries what the provider reported.
    #[error("token lacks required scope (granted: {scopes})")]
    Forbidden { scopes: String },

    /// A repository with the requested name already exists.
    #[error("{0}")]
    NameConflict(String),

    #[error("provider API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRepository {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub private: bool,
    pub auto_init: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub clone_url: String,
    pub ssh_url: String,
    pub private: bool,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

#[derive(Clone)]
pub struct RepoClient {
    base_url: String,
    client: reqwest::Client,
}

impl RepoClient {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().user_agent("launchpad").build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn create_repository(
        &self,
        token: &str,
        req: &CreateRepository,
    ) -> Result<Repository, HostingError> {
        let resp = self
            .client
            .post(format!("{}/user/repos", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .json(req)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        match status.as_u16() {
            401 => Err(HostingError::Unauthorized),
            403 => {
                // The failing response may not carry the scopes header, so ask
                // the provider what the token was actually granted.
                let scopes = self.current_scopes(token).await;
                Err(HostingError::Forbidden { scopes })
            }
            422 => {
                let body: ApiMessage = resp.json().await.unwrap_or(ApiMessage { message: None });
                let message = body.message.unwrap_or_default();
                if message.to_lowercase().contains("already exists") {
                    Err(HostingError::NameConflict(format!(
                        "A repository named '{}' already exists in your account.",
                        req.name
                    )))
                } else {
                    Err(HostingError::Api {
                        status: 422,
                        message,
                    })
                }
            }
            s => {
                let message = resp.text().await.unwrap_or_default();
                Err(HostingError::Api { status: s, message })
            }
        }
    }

    /// What scopes the token was granted, per the provider's scope header.
    pub async fn current_scopes(&self, token: &str) -> String {
        let resp = self
            .client
            .get(format!("{}/user", self.base_url))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await;

        resp.ok()
            .and_then(|r| {
                r.headers()
                    .get("x-oauth-scopes")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "none".to_string())
    }

    /// Seed an initial README.md on the default branch via the contents API.
    pub async fn seed_readme(
        &self,
        token: &str,
        full_name: &str,
        content: &str,
    ) -> Result<(), HostingError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let resp = self
            .client
            .put(format!(
                "{}/repos/{}/contents/README.md",
                self.base_url, full_name
            ))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .json(&serde_json::json!({
                "message": "Initial commit",
                "content": encoded,
                "branch": "main",
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = resp.text().await.unwrap_or_default();
            Err(HostingError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }

    pub async fn delete_repository(
        &self,
        token: &str,
        owner: &str,
        name: &str,
    ) -> Result<(), HostingError> {
        let resp = self
            .client
            .delete(format!("{}/repos/{}/{}", self.base_url, owner, name))
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        match status.as_u16() {
            401 => Err(HostingError::Unauthorized),
            403 => {
                let scopes = self.current_scopes(token).await;
                Err(HostingError::Forbidden { scopes })
            }
            s => {
                let message = resp.text().await.unwrap_or_default();
                Err(HostingError::Api { status: s, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn token_shapes() {
        assert!(is_provider_token("gho_abc123"));
        assert!(is_provider_token("ghp_abc123"));
        assert!(is_provider_token("github_pat_abc123"));
        assert!(!is_provider_token("sk-not-a-provider-token"));
        assert!(!is_provider_token(""));
    }

    fn repo_json(name: &str) -> serde_json::Value {
        serde_json::json!({
            "id": 42,
            "name": name,
            "full_name": format!("octocat/{}", name),
            "html_url": format!("https://example.test/octocat/{}", name),
            "clone_url": format!("https://example.test/octocat/{}.git", name),
            "ssh_url": format!("git@example.test:octocat/{}.git", name),
            "private": false,
            "description": null,
        })
    }

    fn create_req(name: &str) -> CreateRepository {
        CreateRepository {
            name: name.to_string(),
            description: None,
            private: false,
            auto_init: true,
        }
    }

    #[tokio::test]
    async fn create_repository_parses_the_created_repo() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/repos"))
            .and(header("authorization", "Bearer gho_abc123"))
            .respond_with(ResponseTemplate::new(201).set_body_json(repo_json("my-app")))
            .mount(&server)
            .await;

        let client = RepoClient::new(&server.uri()).unwrap();
        let repo = client
            .create_repository("gho_abc123", &create_req("my-app"))
            .await
            .unwrap();

        assert_eq!(repo.full_name, "octocat/my-app");
        assert_eq!(repo.id, 42);
    }

    #[tokio::test]
    async fn name_collision_surfaces_as_name_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "message": "name already exists on this account"
            })))
            .mount(&server)
            .await;

        let client = RepoClient::new(&server.uri()).unwrap();
        let err = client
            .create_repository("gho_abc123", &create_req("my-app"))
            .await
            .unwrap_err();

        match err {
            HostingError::NameConflict(msg) => {
                assert!(msg.contains("my-app"));
            }
            other => panic!("expected NameConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forbidden_reports_granted_scopes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-oauth-scopes", "read:user")
                    .set_body_json(serde_json::json!({"login": "octocat"})),
            )
            .mount(&server)
            .await;

        let client = RepoClient::new(&server.uri()).unwrap();
        let err = client
            .create_repository("gho_abc123", &create_req("my-app"))
            .await
            .unwrap_err();

        match err {
            HostingError::Forbidden { scopes } => assert_eq!(scopes, "read:user"),
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/repos"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = RepoClient::new(&server.uri()).unwrap();
        let err = client
            .create_repository("gho_stale", &create_req("my-app"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostingError::Unauthorized));
    }

    #[tokio::test]
    async fn delete_repository_succeeds_on_204() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/repos/octocat/my-app"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = RepoClient::new(&server.uri()).unwrap();
        client
            .delete_repository("gho_abc123", "octocat", "my-app")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn seed_readme_puts_base64_content() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/repos/octocat/my-app/contents/README.md"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "content": {"path": "README.md"}
            })))
            .mount(&server)
            .await;

        let client = RepoClient::new(&server.uri()).unwrap();
        client
            .seed_readme("gho_abc123", "octocat/my-app", "# my-app\n")
            .await
            .unwrap();
    }
}
