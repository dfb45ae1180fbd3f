pub mod assets;
pub mod health;
pub mod projects;
pub mod variants;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /assets/{asset_type}/{asset_id}/variants            list (GET)
/// /assets/{asset_type}/{asset_id}/variants/generate   fan-out (POST)
/// /assets/{asset_type}/{asset_id}/variants/sweep      scoped stuck sweep (POST)
/// /assets/{asset_type}/{asset_id}/variants/repair-selection
///                                                     duplicate-selection repair (POST)
///
/// /variants/{id}                                      get, delete
/// /variants/{id}/lineage                              refinement chain (GET)
/// /variants/{id}/select                               select (POST)
/// /variants/{id}/unselect                             unselect (POST)
/// /variants/{id}/refine                               refine (POST)
/// /variants/sweep-stuck                               global stuck sweep (POST)
///
/// /projects/{project_id}/generate-all                 project run (POST)
/// /projects/{project_id}/generation-progress          status counts (GET)
/// /projects/{project_id}/bulk-approve                 bulk approve (POST)
///
/// /webhooks/generation                                Generation Service callback (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/assets", assets::router())
        .nest("/variants", variants::router())
        .nest("/projects", projects::router())
        .nest("/webhooks", webhooks::router())
}
