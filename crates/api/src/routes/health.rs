use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;
use storyframe_db::repositories::VariantRepo;

use crate::config::BlobConfig;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the database is unreachable.
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    /// Variants awaiting a Generation Service result. Absent when the
    /// database is down.
    pub in_flight: Option<i64>,
    pub blob_backend: &'static str,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let in_flight = match VariantRepo::count_generating(&state.pool).await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach the database");
            None
        }
    };
    let db_healthy = in_flight.is_some();

    Json(HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        in_flight,
        blob_backend: match state.config.blob {
            BlobConfig::S3 { .. } => "s3",
            BlobConfig::Local { .. } => "local",
        },
    })
}

/// Root-level routes, outside `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
