//! Route definitions for asset-scoped variants.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::asset_variant;
use crate::state::AppState;

/// Routes mounted at `/assets`.
///
/// ```text
/// GET    /{asset_type}/{asset_id}/variants                    -> list
/// POST   /{asset_type}/{asset_id}/variants/generate           -> generate
/// POST   /{asset_type}/{asset_id}/variants/sweep              -> sweep
/// POST   /{asset_type}/{asset_id}/variants/repair-selection   -> repair_selection
/// ```
pub fn router() -> Router<AppState> {
    let variant_routes = Router::new()
        .route("/", get(asset_variant::list))
        .route("/generate", post(asset_variant::generate))
        .route("/sweep", post(asset_variant::sweep))
        .route("/repair-selection", post(asset_variant::repair_selection));

    Router::new().nest("/{asset_type}/{asset_id}/variants", variant_routes)
}
