//! Variant entity model and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::status::VariantStatus;
use storyframe_core::types::{DbId, Timestamp};

/// A row from the `variants` table: one candidate image for an asset slot.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Variant {
    pub id: DbId,
    #[sqlx(try_from = "String")]
    pub asset_type: AssetType,
    pub asset_id: DbId,
    pub sub_type: Option<String>,
    pub model: String,
    pub prompt: String,
    /// Empty until the image has been persisted to the blob store.
    pub image_url: String,
    /// Empty until the image has been persisted to the blob store.
    pub storage_path: String,
    #[sqlx(rename = "status_id", try_from = "i16")]
    pub status: VariantStatus,
    pub is_selected: bool,
    pub generation_order: i32,
    pub parent_variant_id: Option<DbId>,
    /// Generation Service task handle, used to resolve late callbacks.
    pub job_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Variant {
    /// The slot this variant competes for.
    pub fn key(&self) -> AssetKey {
        AssetKey::new(self.asset_type, self.asset_id, self.sub_type.clone())
    }

    /// `true` when the image lives in durable storage.
    pub fn is_persisted(&self) -> bool {
        !self.image_url.is_empty() && !self.storage_path.is_empty()
    }
}

/// DTO for inserting a new variant. Rows always start in `generating`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVariant {
    pub asset_type: AssetType,
    pub asset_id: DbId,
    pub sub_type: Option<String>,
    pub model: String,
    pub prompt: String,
    pub generation_order: i32,
    pub parent_variant_id: Option<DbId>,
}

impl CreateVariant {
    pub fn for_key(key: &AssetKey, model: &str, prompt: &str, generation_order: i32) -> Self {
        Self {
            asset_type: key.asset_type,
            asset_id: key.asset_id,
            sub_type: key.sub_type.clone(),
            model: model.to_string(),
            prompt: prompt.to_string(),
            generation_order,
            parent_variant_id: None,
        }
    }

    pub fn with_parent(mut self, parent_variant_id: DbId) -> Self {
        self.parent_variant_id = Some(parent_variant_id);
        self
    }
}
