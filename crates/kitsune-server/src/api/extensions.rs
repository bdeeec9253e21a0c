//! Extension management API endpoints.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use kitsune_extensions::{AddSourceOutcome, ExtensionKey, ExtensionState, ExtensionStatus};
use serde::{Deserialize, Serialize};

use super::{error, ApiError, AppState};

// ─── Request / Response types ───────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ExtensionListResponse {
    pub ready: bool,
    pub extensions: Vec<ExtensionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct AddSourceRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct AddSourceResponse {
    pub outcome: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub installed: Vec<ExtensionKey>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveSourceQuery {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub reloaded: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub key: ExtensionKey,
}

#[derive(Debug, Serialize)]
pub struct ExtensionStateResponse {
    pub key: ExtensionKey,
    pub state: ExtensionState,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EnabledRequest {
    pub key: ExtensionKey,
    pub enabled: bool,
}

// ─── Handlers ───────────────────────────────────────────────────────────

/// GET /api/extensions — List installed extensions with their state.
pub async fn list_extensions(State(state): State<Arc<AppState>>) -> Json<ExtensionListResponse> {
    Json(ExtensionListResponse {
        ready: state.manager.is_ready(),
        extensions: state.manager.snapshot().await,
    })
}

/// POST /api/extensions/sources — Install extensions or a source repository.
pub async fn add_source(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AddSourceRequest>,
) -> Result<(StatusCode, Json<AddSourceResponse>), ApiError> {
    let url = body.url.trim();
    if url.is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "url is required"));
    }

    let outcome = state.manager.add_source(url).await;
    let message = outcome.to_string();
    let (status, kind, installed) = match outcome {
        AddSourceOutcome::Installed(keys) => (StatusCode::CREATED, "installed", keys),
        AddSourceOutcome::CatalogStored => (StatusCode::OK, "catalog_stored", Vec::new()),
        AddSourceOutcome::CatalogUnchanged => (StatusCode::OK, "catalog_unchanged", Vec::new()),
        AddSourceOutcome::Failed(_) => {
            tracing::warn!(url = %url, "failed to add source: {message}");
            return Err(error(StatusCode::UNPROCESSABLE_ENTITY, message));
        }
    };

    tracing::info!(url = %url, outcome = kind, "source added via API");
    Ok((
        status,
        Json(AddSourceResponse {
            outcome: kind,
            message,
            installed,
        }),
    ))
}

/// DELETE /api/extensions/sources?url= — Remove every extension of a source.
pub async fn remove_source(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RemoveSourceQuery>,
) -> StatusCode {
    state.manager.remove_source(&query.url).await;
    StatusCode::NO_CONTENT
}

/// POST /api/extensions/reload — Restart every extension worker.
pub async fn reload_extensions(State(state): State<Arc<AppState>>) -> Json<ReloadResponse> {
    Json(ReloadResponse {
        reloaded: state.manager.reload_extensions().await,
    })
}

/// POST /api/extensions/validate — Revalidate an inactive extension.
pub async fn validate_extension(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateRequest>,
) -> Json<ExtensionStateResponse> {
    state.manager.validate_extension(&body.key).await;
    let current = state.manager.extension_state(&body.key).await;
    Json(ExtensionStateResponse {
        key: body.key,
        state: current,
    })
}

/// PUT /api/extensions/enabled — Toggle an installed extension.
pub async fn set_enabled(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnabledRequest>,
) -> Result<Json<EnabledRequest>, ApiError> {
    if !state.manager.set_enabled(&body.key, body.enabled) {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("extension not installed: {}", body.key),
        ));
    }
    Ok(Json(body))
}
