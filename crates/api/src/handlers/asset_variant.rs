//! Handlers for variants scoped to one asset.
//!
//! Mounted at `/assets/{asset_type}/{asset_id}/variants`. The asset type
//! accepts the singular or plural name (`character`, `characters`).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::error::CoreError;
use storyframe_core::prompt::{FixedPrompt, PromptBuilder, PromptContext, StandardPromptBuilder};
use storyframe_core::types::DbId;
use storyframe_db::models::variant::Variant;
use storyframe_pipeline::fanout::FanOutOptions;
use storyframe_pipeline::selection::SelectionRepair;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Optional slot discriminator.
#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub sub_type: Option<String>,
}

/// Scope and age limit of a sweep.
#[derive(Debug, Deserialize)]
pub struct SweepQuery {
    pub sub_type: Option<String>,
    /// Overrides every per-model stuck threshold.
    pub max_age_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub reset: usize,
}

/// Body of `POST .../variants/generate`.
#[derive(Debug, Deserialize)]
pub struct GenerateVariantsRequest {
    #[serde(default)]
    pub sub_type: Option<String>,
    pub models: Vec<String>,
    /// Literal prompt. When absent the prompt is built from the asset.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub composition: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub reference_images: Vec<String>,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    /// Hold the response until every dispatch has settled.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
pub struct GenerateVariantsResponse {
    pub prompt: String,
    pub variants: Vec<Variant>,
}

fn parse_key(asset_type: &str, asset_id: DbId, sub_type: Option<String>) -> AppResult<AssetKey> {
    let asset_type = AssetType::from_name(asset_type)?;
    Ok(AssetKey::new(asset_type, asset_id, sub_type))
}

/// Re-read variants after their dispatch has settled.
pub(crate) async fn reload(state: &AppState, ids: &[DbId]) -> AppResult<Vec<Variant>> {
    let mut variants = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(variant) = state.variants.find(*id).await? {
            variants.push(variant);
        }
    }
    Ok(variants)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/assets/{asset_type}/{asset_id}/variants/generate
///
/// Creates one variant per model and dispatches them in the background,
/// answering `202` with the `generating` rows. With `wait: true` the
/// dispatch runs inline and the settled rows are returned with `200`.
pub async fn generate(
    State(state): State<AppState>,
    Path((asset_type, asset_id)): Path<(String, DbId)>,
    Json(input): Json<GenerateVariantsRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<GenerateVariantsResponse>>)> {
    let key = parse_key(&asset_type, asset_id, input.sub_type.clone())?;
    let asset = state
        .assets
        .get_asset(key.asset_type, asset_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Asset",
            id: asset_id,
        }))?;

    let fixed = input.prompt.clone().map(FixedPrompt);
    let builder: &dyn PromptBuilder = match &fixed {
        Some(prompt) => prompt,
        None => &StandardPromptBuilder,
    };
    let context = PromptContext {
        asset_name: &asset.name,
        visual_description: asset.visual_description.as_deref(),
        action: input.action.as_deref(),
        composition: input.composition.as_deref(),
        style: input.style.as_deref(),
        has_reference_images: !input.reference_images.is_empty(),
    };
    let options = FanOutOptions {
        reference_images: input.reference_images.clone(),
        aspect_ratio: input.aspect_ratio.clone(),
    };

    let prepared = state
        .fanout
        .create_variants(&key, &input.models, builder, &context, options)
        .await?;
    let prompt = prepared.prompt.clone();

    if input.wait {
        let ids = prepared.variant_ids();
        state.fanout.dispatch(prepared).await;
        let variants = reload(&state, &ids).await?;
        return Ok((
            StatusCode::OK,
            Json(DataResponse::new(GenerateVariantsResponse { prompt, variants })),
        ));
    }

    let variants = prepared.variants.clone();
    let fanout = Arc::clone(&state.fanout);
    tokio::spawn(async move {
        fanout.dispatch(prepared).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse::new(GenerateVariantsResponse { prompt, variants })),
    ))
}

/// GET /api/v1/assets/{asset_type}/{asset_id}/variants[?sub_type=]
///
/// Without `sub_type` every slot of the asset is listed.
pub async fn list(
    State(state): State<AppState>,
    Path((asset_type, asset_id)): Path<(String, DbId)>,
    Query(query): Query<SlotQuery>,
) -> AppResult<Json<DataResponse<Vec<Variant>>>> {
    let key = parse_key(&asset_type, asset_id, query.sub_type)?;
    let variants = if key.sub_type.is_some() {
        state.variants.list_by_key(&key).await?
    } else {
        state
            .variants
            .list_by_asset(key.asset_type, key.asset_id)
            .await?
    };
    Ok(Json(DataResponse::new(variants)))
}

/// POST /api/v1/assets/{asset_type}/{asset_id}/variants/sweep
pub async fn sweep(
    State(state): State<AppState>,
    Path((asset_type, asset_id)): Path<(String, DbId)>,
    Query(query): Query<SweepQuery>,
) -> AppResult<Json<DataResponse<SweepResponse>>> {
    let key = parse_key(&asset_type, asset_id, query.sub_type)?;
    let reset = state
        .recovery
        .sweep_stuck(Some(&key), query.max_age_minutes)
        .await?;
    Ok(Json(DataResponse::new(SweepResponse { reset })))
}

/// POST /api/v1/assets/{asset_type}/{asset_id}/variants/repair-selection
pub async fn repair_selection(
    State(state): State<AppState>,
    Path((asset_type, asset_id)): Path<(String, DbId)>,
    Query(query): Query<SlotQuery>,
) -> AppResult<Json<DataResponse<SelectionRepair>>> {
    let key = parse_key(&asset_type, asset_id, query.sub_type)?;
    let repair = state.selection.resolve_duplicate_selections(&key).await?;
    Ok(Json(DataResponse::new(repair)))
}
