//! Project-wide batch entry points.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use storyframe_core::generation_model::validate_models;
use storyframe_core::types::DbId;
use storyframe_pipeline::project::{ProjectProgress, ProjectRunRequest};
use storyframe_pipeline::selection::BulkApproveReport;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProjectRunAccepted {
    pub project_id: DbId,
    pub models: usize,
}

/// POST /api/v1/projects/{project_id}/generate-all
///
/// Validates the request, then runs the whole project in the background.
/// Poll `generation-progress` to follow it.
pub async fn generate_all(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
    Json(input): Json<ProjectRunRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<ProjectRunAccepted>>)> {
    validate_models(&input.models, state.config.pipeline.max_models_per_fanout)?;

    let models = input.models.len();
    let project = Arc::clone(&state.project);
    tokio::spawn(async move {
        if let Err(e) = project.generate_for_project(project_id, &input).await {
            tracing::error!(project_id, error = %e, "Project generation aborted");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse::new(ProjectRunAccepted { project_id, models })),
    ))
}

/// GET /api/v1/projects/{project_id}/generation-progress
pub async fn generation_progress(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<Json<DataResponse<ProjectProgress>>> {
    let progress = state.project.generation_progress(project_id).await?;
    Ok(Json(DataResponse::new(progress)))
}

/// POST /api/v1/projects/{project_id}/bulk-approve
pub async fn bulk_approve(
    State(state): State<AppState>,
    Path(project_id): Path<DbId>,
) -> AppResult<Json<DataResponse<BulkApproveReport>>> {
    let report = state.selection.bulk_approve(project_id).await?;
    Ok(Json(DataResponse::new(report)))
}
