//! Repository provisioning endpoint. Creates the repository synchronously,
//! then streams the rest of the setup over the principal's progress channel.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::draft::{Integrations, ProjectDraft, TechStack};
use crate::errors::AppError;
use crate::hosting::{CreateRepository, Repository};
use crate::progress::{ProjectUpdate, UpdateType};
use crate::AppState;

use super::CurrentUser;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_true")]
    pub auto_init: bool,
    #[serde(default)]
    pub tech_stack: Option<TechStack>,
    #[serde(default)]
    pub integrations: Option<Integrations>,
}

pub async fn create_repository(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    headers: HeaderMap,
    Json(body): Json<CreateRepositoryRequest>,
) -> Result<Json<Repository>, AppError> {
    let provider_token = headers
        .get("x-github-token")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::ProviderTokenMissing)?
        .to_string();

    let draft = ProjectDraft {
        name: body.name.clone(),
        description: body.description.clone().unwrap_or_default(),
        private: body.private,
        auto_init: body.auto_init,
        tech_stack: body.tech_stack.clone().unwrap_or_default(),
        integrations: body.integrations.clone().unwrap_or_default(),
        ..Default::default()
    };
    draft.validate().map_err(AppError::Validation)?;

    tracing::info!(user_id = %user.id, name = %body.name, "creating repository");

    let repo = state
        .repos
        .create_repository(
            &provider_token,
            &CreateRepository {
                name: body.name,
                description: body.description,
                private: body.private,
                auto_init: body.auto_init,
            },
        )
        .await?;

    // The response returns as soon as the repository exists; template setup
    // continues on the progress channel.
    tokio::spawn(setup_pipeline(
        state.clone(),
        user.id,
        provider_token,
        repo.clone(),
        draft,
    ));

    Ok(Json(repo))
}

async fn setup_pipeline(
    state: Arc<AppState>,
    user_id: uuid::Uuid,
    provider_token: String,
    repo: Repository,
    draft: ProjectDraft,
) {
    let publish = |update_type: UpdateType, data: serde_json::Value| {
        state
            .broker
            .publish(user_id, ProjectUpdate::new(update_type, data));
    };

    publish(
        UpdateType::RepositoryCreated,
        json!({ "name": repo.name, "url": repo.html_url }),
    );
    publish(UpdateType::PreparingTemplate, json!({ "name": repo.name }));
    publish(UpdateType::TemplateReady, json!({ "name": repo.name }));
    publish(UpdateType::UploadStarted, json!({ "total_files": 1 }));

    if draft.auto_init {
        match state
            .repos
            .seed_readme(&provider_token, &repo.full_name, &draft.readme())
            .await
        {
            Ok(()) => {
                publish(
                    UpdateType::UploadProgress,
                    json!({ "current": 1, "total": 1, "percentage": 100 }),
                );
                publish(
                    UpdateType::CommitCreated,
                    json!({ "message": "Initial commit", "branch": "main" }),
                );
            }
            Err(e) => {
                // Seeding failures leave the bare repository in place.
                tracing::warn!(repo = %repo.full_name, error = %e, "README seed failed");
                publish(
                    UpdateType::FileError,
                    json!({ "file": "README.md", "error": e.to_string() }),
                );
            }
        }
    }

    publish(UpdateType::UploadComplete, json!({ "name": repo.name }));
    state.broker.close(user_id);
}
