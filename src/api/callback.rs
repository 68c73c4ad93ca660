//! OAuth callback landing. Exchanges the code, captures the one-shot
//! provider token into custody, then redirects onward with the auth marker
//! so the client can resume an interrupted run.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Redirect;
use chrono::Utc;
use serde::Deserialize;

use crate::hosting::REQUIRED_SCOPES;
use crate::retry::{retry, RetryPolicy};
use crate::store::CredentialRecord;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error_description: Option<String>,
    pub redirect_to: Option<String>,
}

pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    if let Some(description) = params.error_description {
        tracing::warn!(error = %description, "identity provider returned an error");
        return Redirect::to(&format!("/auth?error={}", urlencoding::encode(&description)));
    }

    let Some(code) = params.code else {
        return Redirect::to("/auth?error=missing%20authorization%20code");
    };

    let session = match state.identity.exchange_code(&code).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "code exchange failed");
            return Redirect::to(&format!(
                "/auth?error={}",
                urlencoding::encode("sign-in could not be completed")
            ));
        }
    };

    // The provider token only exists in this exchange response. Persist it
    // now or it is gone until the next consent round-trip.
    if let Some(provider_token) = session.provider_token.clone() {
        if session.logged_in_with_hosting_provider() {
            persist_provider_token(&state, &session, provider_token).await;
        }
    } else {
        tracing::warn!(user_id = %session.user_id, "session arrived without a provider token");
    }

    let target = params
        .redirect_to
        .filter(|t| is_local_path(t))
        .unwrap_or_else(|| state.config.default_redirect.clone());
    Redirect::to(&append_marker(&target))
}

/// Best-effort durable capture with a short retry budget. Exhausting it is
/// logged but never fails the login; the resolver can still use the
/// session-embedded token for this cycle.
async fn persist_provider_token(
    state: &AppState,
    session: &crate::identity::Session,
    provider_token: String,
) {
    let now = Utc::now();
    let record = CredentialRecord {
        user_id: session.user_id,
        access_token: provider_token,
        refresh_token: session.provider_refresh_token.clone(),
        scopes: REQUIRED_SCOPES.iter().map(|s| s.to_string()).collect(),
        provider_username: session.provider_username.clone(),
        expires_at: session.expires_at,
        created_at: now,
        updated_at: now,
    };

    let result = retry(
        RetryPolicy::credential_persistence(),
        "credential persistence",
        || {
            let record = record.clone();
            async move { state.store.upsert(record).await }
        },
    )
    .await;

    match result {
        Ok(_) => tracing::info!(user_id = %session.user_id, "captured delegated credential"),
        Err(e) => {
            tracing::error!(user_id = %session.user_id, error = %e,
                "could not persist delegated credential; continuing login");
        }
    }
}

/// Only same-site paths may be redirect targets. `//host` and `/\host` are
/// scheme-relative in browsers, so a single leading slash is not enough.
fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\")
}

/// Append the `from_auth=true` marker the client uses to detect an auth
/// landing, respecting any query string already present.
fn append_marker(target: &str) -> String {
    if target.contains('?') {
        format!("{target}&from_auth=true")
    } else {
        format!("{target}?from_auth=true")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_same_site_paths_are_redirect_targets() {
        assert!(is_local_path("/newproject"));
        assert!(is_local_path("/newproject?tab=config"));
        assert!(!is_local_path("https://evil.example/phish"));
        assert!(!is_local_path("//evil.example"));
        assert!(!is_local_path("/\\evil.example"));
        assert!(!is_local_path(""));
    }

    #[test]
    fn marker_appends_with_the_right_separator() {
        assert_eq!(append_marker("/newproject"), "/newproject?from_auth=true");
        assert_eq!(
            append_marker("/newproject?tab=config"),
            "/newproject?tab=config&from_auth=true"
        );
        assert_eq!(append_marker("/dashboard"), "/dashboard?from_auth=true");
    }
}
