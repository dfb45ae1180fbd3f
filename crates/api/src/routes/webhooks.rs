use axum::routing::post;
use axum::Router;

use crate::handlers::webhook;
use crate::state::AppState;

/// Routes mounted at `/webhooks`. The generation path must match
/// `storyframe_pipeline::config::CALLBACK_PATH`.
pub fn router() -> Router<AppState> {
    Router::new().route("/generation", post(webhook::generation_callback))
}
