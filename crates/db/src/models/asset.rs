//! Asset models: the prompt-relevant asset row and the approved-image slot.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use storyframe_core::asset::AssetType;
use storyframe_core::status::AssetStatus;
use storyframe_core::types::{DbId, Timestamp};

/// A row from the `assets` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Asset {
    pub id: DbId,
    pub project_id: DbId,
    #[sqlx(try_from = "String")]
    pub asset_type: AssetType,
    pub name: String,
    pub visual_description: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating an asset.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAsset {
    pub project_id: DbId,
    pub asset_type: AssetType,
    pub name: String,
    pub visual_description: Option<String>,
}

/// A row from the `asset_images` table: the approved slice of one slot.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AssetImage {
    pub id: DbId,
    pub asset_id: DbId,
    pub sub_type: Option<String>,
    pub approved_image_url: Option<String>,
    pub approved_image_path: Option<String>,
    pub approved_at: Option<Timestamp>,
    #[sqlx(rename = "generation_status_id", try_from = "i16")]
    pub generation_status: AssetStatus,
    pub selected_model: Option<String>,
    pub updated_at: Timestamp,
}

/// Values copied from a selected variant onto its slot.
#[derive(Debug, Clone)]
pub struct ApprovedImage {
    pub image_url: String,
    pub storage_path: String,
    pub model: String,
}
