//! Provisioning orchestrator — drives one project-creation run end to end:
//! validate, resolve a credential, create the repository, follow progress,
//! settle. At most one run is in flight per principal.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::draft::{DraftStore, ProjectDraft};
use crate::hosting::{HostingError, Repository};
use crate::identity::{await_session, SessionSource};
use crate::progress::{consume, ProgressSource, StreamOutcome};
use crate::resolver::{resolve, CustodyApi, Resolution};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProvisionError {
    #[error("{0}")]
    Validation(String),

    #[error("not signed in")]
    Unauthenticated,

    #[error("{0}")]
    NameConflict(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone)]
pub enum ProvisionState {
    Idle,
    Validating,
    ResolvingCredential,
    /// No usable credential; the user must re-consent. The draft is kept and
    /// flagged to auto-resume after the redirect. `force_consent` is set when
    /// the provider rejected the credential as under-scoped, so the next
    /// authorization must re-display the consent screen.
    ReauthPending { force_consent: bool },
    Creating,
    Streaming,
    Succeeded(Repository),
    /// The progress channel closed before the terminal event. The repository
    /// exists; only the tail of the upload is unconfirmed.
    StreamInconclusive(Repository),
    Failed(ProvisionError),
}

impl ProvisionState {
    fn in_flight(&self) -> bool {
        matches!(
            self,
            ProvisionState::Validating
                | ProvisionState::ResolvingCredential
                | ProvisionState::Creating
                | ProvisionState::Streaming
        )
    }
}

/// Port to the repository-provisioning endpoint.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync {
    async fn create(
        &self,
        session_token: &str,
        provider_token: &str,
        draft: &ProjectDraft,
    ) -> Result<Repository, HostingError>;
}

/// Provisioning over the HTTP endpoint.
pub struct HttpProvisioner {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProvisioner {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl Provisioner for HttpProvisioner {
    async fn create(
        &self,
        session_token: &str,
        provider_token: &str,
        draft: &ProjectDraft,
    ) -> Result<Repository, HostingError> {
        let resp = self
            .client
            .post(format!("{}/api/v1/repositories", self.base_url))
            .bearer_auth(session_token)
            .header("X-GitHub-Token", provider_token)
            .json(&serde_json::json!({
                "name": draft.name,
                "description": draft.description,
                "private": draft.private,
                "auto_init": draft.auto_init,
                "tech_stack": draft.tech_stack,
                "integrations": draft.integrations,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        match status.as_u16() {
            401 => Err(HostingError::Unauthorized),
            403 => Err(HostingError::Forbidden {
                scopes: "unknown".to_string(),
            }),
            422 => {
                let body: serde_json::Value = resp.json().await.unwrap_or_default();
                let message = body["error"]["message"]
                    .as_str()
                    .unwrap_or("repository name already taken")
                    .to_string();
                Err(HostingError::NameConflict(message))
            }
            s => {
                let message = resp.text().await.unwrap_or_default();
                Err(HostingError::Api { status: s, message })
            }
        }
    }
}

/// Ceiling on how long a run waits for the progress stream to reach its
/// terminal event before settling as inconclusive.
const STREAM_TIMEOUT: Duration = Duration::from_secs(60);

pub struct Orchestrator {
    drafts: DraftStore,
    sessions: Arc<dyn SessionSource>,
    custody: Arc<dyn CustodyApi>,
    provisioner: Arc<dyn Provisioner>,
    progress: Arc<dyn ProgressSource>,
    stream_timeout: Duration,
    state: Mutex<ProvisionState>,
}

impl Orchestrator {
    pub fn new(
        drafts: DraftStore,
        sessions: Arc<dyn SessionSource>,
        custody: Arc<dyn CustodyApi>,
        provisioner: Arc<dyn Provisioner>,
        progress: Arc<dyn ProgressSource>,
    ) -> Self {
        Self {
            drafts,
            sessions,
            custody,
            provisioner,
            progress,
            stream_timeout: STREAM_TIMEOUT,
            state: Mutex::new(ProvisionState::Idle),
        }
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub async fn state(&self) -> ProvisionState {
        self.state.lock().await.clone()
    }

    #[cfg(test)]
    pub async fn set_state(&self, state: ProvisionState) {
        *self.state.lock().await = state;
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    /// Kick off a run for `draft`. Ignored while another run is in flight.
    pub async fn trigger(&self, draft: ProjectDraft) {
        {
            let mut state = self.state.lock().await;
            if state.in_flight() {
                tracing::debug!("provisioning already in flight, ignoring trigger");
                return;
            }
            *state = ProvisionState::Validating;
        }

        let outcome = self.run(draft).await;
        *self.state.lock().await = outcome;
    }

    /// Landing handler after a redirect: wait for the session to settle,
    /// restore the draft, and restart an interrupted run.
    pub async fn resume_after_redirect(&self, arrived_from_redirect: bool) -> anyhow::Result<()> {
        let session = await_session(self.sessions.as_ref()).await;
        let draft = self
            .drafts
            .resume(arrived_from_redirect, session.is_some())?;

        if let Some(draft) = draft {
            if draft.auto_create {
                tracing::info!(name = %draft.name, "resuming interrupted provisioning run");
                self.trigger(draft).await;
            }
        }
        Ok(())
    }

    async fn run(&self, draft: ProjectDraft) -> ProvisionState {
        // Validation happens before any network traffic.
        if let Err(msg) = draft.validate() {
            return ProvisionState::Failed(ProvisionError::Validation(msg));
        }

        *self.state.lock().await = ProvisionState::ResolvingCredential;

        let session = match self.sessions.current().await {
            Ok(Some(session)) => session,
            Ok(None) => return self.park_for_reauth(draft, false).await,
            Err(e) => {
                return ProvisionState::Failed(ProvisionError::Other(format!(
                    "session lookup failed: {e}"
                )))
            }
        };

        let token = match resolve(&session, self.custody.clone()).await {
            Ok(Resolution::Resolved { token, .. }) => token,
            Ok(Resolution::Absent) => return self.park_for_reauth(draft, false).await,
            Err(e) => {
                return ProvisionState::Failed(ProvisionError::Other(format!(
                    "credential resolution failed: {e}"
                )))
            }
        };

        *self.state.lock().await = ProvisionState::Creating;

        let repo = match self
            .provisioner
            .create(&session.access_token, &token, &draft)
            .await
        {
            Ok(repo) => repo,
            Err(HostingError::Unauthorized) => {
                // The stored credential is stale; park the draft and send
                // the user back through consent.
                return self.park_for_reauth(draft, false).await;
            }
            Err(HostingError::Forbidden { scopes }) => {
                tracing::warn!(granted = %scopes, "credential under-scoped, forcing re-consent");
                return self.park_for_reauth(draft, true).await;
            }
            Err(HostingError::NameConflict(msg)) => {
                // Terminal, but the draft stays so the user can rename.
                return ProvisionState::Failed(ProvisionError::NameConflict(msg));
            }
            Err(e) => return ProvisionState::Failed(ProvisionError::Other(e.to_string())),
        };

        *self.state.lock().await = ProvisionState::Streaming;

        // The wait is bounded: subscribing after the server pipeline already
        // finished would otherwise tail a channel nobody publishes to again.
        let outcome = match self.progress.subscribe(session.user_id).await {
            Some(stream) => tokio::time::timeout(self.stream_timeout, consume(stream))
                .await
                .unwrap_or(StreamOutcome::Inconclusive),
            // Progress is advisory; an unobservable stream does not undo a
            // created repository.
            None => StreamOutcome::Complete,
        };

        self.settle(repo, outcome).await
    }

    async fn park_for_reauth(&self, mut draft: ProjectDraft, force_consent: bool) -> ProvisionState {
        draft.auto_create = true;
        if let Err(e) = self.drafts.save(&draft) {
            tracing::error!(error = %e, "failed to park draft before re-consent");
        }
        ProvisionState::ReauthPending { force_consent }
    }

    /// The authorization URL a `ReauthPending` caller sends the user to.
    /// `redirect_to` is where the consent round trip should land, so the
    /// parked draft resumes there.
    pub async fn consent_url(&self, identity_base: &str, redirect_to: &str) -> String {
        let force = matches!(
            *self.state.lock().await,
            ProvisionState::ReauthPending { force_consent: true }
        );
        crate::identity::consent_url(identity_base, redirect_to, force)
    }

    /// Disconnect on sign-out: the custody record is removed and the draft
    /// discarded. Custody failures are logged but do not block sign-out.
    pub async fn sign_out(&self, session_token: &str) -> anyhow::Result<()> {
        if let Err(e) = self.custody.delete_credential(session_token).await {
            tracing::warn!(error = %e, "could not remove custody record on sign-out");
        }
        self.drafts.clear()?;
        *self.state.lock().await = ProvisionState::Idle;
        Ok(())
    }

    async fn settle(&self, repo: Repository, outcome: StreamOutcome) -> ProvisionState {
        // The run is over either way, so the draft is spent.
        if let Err(e) = self.drafts.clear() {
            tracing::error!(error = %e, "failed to clear draft after provisioning");
        }
        match outcome {
            StreamOutcome::Complete => {
                tracing::info!(repo = %repo.full_name, "provisioning complete");
                ProvisionState::Succeeded(repo)
            }
            StreamOutcome::Inconclusive => {
                tracing::warn!(repo = %repo.full_name, "progress stream ended early");
                ProvisionState::StreamInconclusive(repo)
            }
        }
    }
}
