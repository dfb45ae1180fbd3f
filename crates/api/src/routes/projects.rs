//! Route definitions for project-wide batch operations.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::project;
use crate::state::AppState;

/// Routes mounted at `/projects`.
///
/// ```text
/// POST   /{project_id}/generate-all          -> generate_all
/// GET    /{project_id}/generation-progress   -> generation_progress
/// POST   /{project_id}/bulk-approve          -> bulk_approve
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{project_id}/generate-all", post(project::generate_all))
        .route(
            "/{project_id}/generation-progress",
            get(project::generation_progress),
        )
        .route("/{project_id}/bulk-approve", post(project::bulk_approve))
}
