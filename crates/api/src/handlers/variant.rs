//! Handlers for the `/variants` resource.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use storyframe_core::error::CoreError;
use storyframe_core::types::DbId;
use storyframe_db::models::variant::Variant;

use crate::error::{AppError, AppResult};
use crate::handlers::asset_variant::{reload, SweepResponse};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct MaxAgeQuery {
    pub max_age_minutes: Option<i64>,
}

/// Body of `POST /variants/{id}/refine`.
#[derive(Debug, Deserialize)]
pub struct RefineRequest {
    /// Text-to-image or image-to-image model; forced to its image-to-image form.
    pub model: String,
    /// Sent verbatim; the source image carries the earlier context.
    pub prompt: String,
    #[serde(default)]
    pub wait: bool,
}

/// GET /api/v1/variants/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Variant>>> {
    let variant = state
        .variants
        .find(id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Variant",
            id,
        }))?;
    Ok(Json(DataResponse::new(variant)))
}

/// GET /api/v1/variants/{id}/lineage
///
/// The variant first, then each parent back to the root.
pub async fn lineage(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Vec<Variant>>>> {
    let chain = state.refinement.lineage(id).await?;
    Ok(Json(DataResponse::new(chain)))
}

/// POST /api/v1/variants/{id}/select
pub async fn select(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Variant>>> {
    let variant = state.selection.select(id).await?;
    Ok(Json(DataResponse::new(variant)))
}

/// POST /api/v1/variants/{id}/unselect
pub async fn unselect(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<Variant>>> {
    let variant = state.selection.unselect(id).await?;
    Ok(Json(DataResponse::new(variant)))
}

/// POST /api/v1/variants/{id}/refine
///
/// Creates the child variant and dispatches it in the background (`202`),
/// or inline with `wait: true` (`200`).
pub async fn refine(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<RefineRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<Variant>>)> {
    let prepared = state
        .refinement
        .create_refinement(id, &input.model, &input.prompt)
        .await?;
    let child_id = prepared.variant.id;

    if input.wait {
        state.refinement.dispatch(prepared).await;
        let variant = reload(&state, &[child_id])
            .await?
            .pop()
            .ok_or(AppError::Core(CoreError::NotFound {
                entity: "Variant",
                id: child_id,
            }))?;
        return Ok((StatusCode::OK, Json(DataResponse::new(variant))));
    }

    let variant = prepared.variant.clone();
    let refinement = Arc::clone(&state.refinement);
    tokio::spawn(async move {
        refinement.dispatch(prepared).await;
    });
    Ok((StatusCode::ACCEPTED, Json(DataResponse::new(variant))))
}

/// DELETE /api/v1/variants/{id}[?force=true]
///
/// A selected variant is refused with `409` unless `force` is set.
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(query): Query<DeleteQuery>,
) -> AppResult<StatusCode> {
    state.selection.delete(id, query.force).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/variants/sweep-stuck[?max_age_minutes=]
pub async fn sweep_stuck(
    State(state): State<AppState>,
    Query(query): Query<MaxAgeQuery>,
) -> AppResult<Json<DataResponse<SweepResponse>>> {
    let reset = state
        .recovery
        .sweep_stuck(None, query.max_age_minutes)
        .await?;
    Ok(Json(DataResponse::new(SweepResponse { reset })))
}
