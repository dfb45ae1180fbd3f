//! Route definitions for the `/variants` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::variant;
use crate::state::AppState;

/// Routes mounted at `/variants`.
///
/// ```text
/// POST   /sweep-stuck          -> sweep_stuck
/// GET    /{id}                 -> get_by_id
/// DELETE /{id}                 -> delete
/// GET    /{id}/lineage         -> lineage
/// POST   /{id}/select          -> select
/// POST   /{id}/unselect        -> unselect
/// POST   /{id}/refine          -> refine
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sweep-stuck", post(variant::sweep_stuck))
        .route("/{id}", get(variant::get_by_id).delete(variant::delete))
        .route("/{id}/lineage", get(variant::lineage))
        .route("/{id}/select", post(variant::select))
        .route("/{id}/unselect", post(variant::unselect))
        .route("/{id}/refine", post(variant::refine))
}
