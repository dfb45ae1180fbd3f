//! Generation Service callback endpoint.
//!
//! The payload is checked synchronously and answered with `202`; the
//! download, upload and status write happen in the background so the
//! Generation Service is never held open by the persistence retries.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use storyframe_generation::CallbackPayload;
use storyframe_pipeline::ResolveOutcome;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CallbackAccepted {
    pub accepted: bool,
}

/// POST /api/v1/webhooks/generation
pub async fn generation_callback(
    State(state): State<AppState>,
    Json(payload): Json<CallbackPayload>,
) -> AppResult<(StatusCode, Json<DataResponse<CallbackAccepted>>)> {
    payload.validate()?;

    let fanout = Arc::clone(&state.fanout);
    tokio::spawn(async move {
        match fanout.handle_callback(&payload).await {
            Ok(ResolveOutcome::Ready(variant)) => {
                tracing::info!(variant_id = variant.id, "Callback resolved variant");
            }
            Ok(ResolveOutcome::Failed(variant)) => {
                tracing::info!(variant_id = variant.id, "Callback reported failure");
            }
            Ok(outcome) => {
                tracing::debug!(
                    task_id = ?payload.task_id,
                    ?outcome,
                    "Callback left variant unchanged",
                );
            }
            Err(e) => {
                tracing::warn!(
                    task_id = ?payload.task_id,
                    variant_id = ?payload.variant_id,
                    error = %e,
                    "Callback rejected",
                );
            }
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse::new(CallbackAccepted { accepted: true })),
    ))
}
