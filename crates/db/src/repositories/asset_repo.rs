//! Repository for `assets` and the per-slot `asset_images` table.
//!
//! Slot rows are created lazily: every write is an upsert keyed on
//! `(asset_id, COALESCE(sub_type, ''))`.

use sqlx::PgPool;
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::status::AssetStatus;
use storyframe_core::types::DbId;

use crate::models::asset::{ApprovedImage, Asset, AssetImage, CreateAsset};

/// Column list for `assets`.
const ASSET_COLUMNS: &str =
    "id, project_id, asset_type, name, visual_description, created_at, updated_at";

/// Column list for `asset_images`.
const IMAGE_COLUMNS: &str = "id, asset_id, sub_type, approved_image_url, approved_image_path, \
    approved_at, generation_status_id, selected_model, updated_at";

/// Upsert conflict target matching `uq_asset_images_slot`.
const SLOT_CONFLICT: &str = "ON CONFLICT (asset_id, (COALESCE(sub_type, '')))";

/// Provides reads of assets and writes of their approved slice.
pub struct AssetRepo;

impl AssetRepo {
    /// Insert a new asset, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateAsset) -> Result<Asset, sqlx::Error> {
        let query = format!(
            "INSERT INTO assets (project_id, asset_type, name, visual_description)
             VALUES ($1, $2, $3, $4)
             RETURNING {ASSET_COLUMNS}"
        );
        sqlx::query_as::<_, Asset>(&query)
            .bind(input.project_id)
            .bind(input.asset_type.name())
            .bind(&input.name)
            .bind(&input.visual_description)
            .fetch_one(pool)
            .await
    }

    /// Find an asset by type and ID.
    pub async fn find(
        pool: &PgPool,
        asset_type: AssetType,
        id: DbId,
    ) -> Result<Option<Asset>, sqlx::Error> {
        let query =
            format!("SELECT {ASSET_COLUMNS} FROM assets WHERE id = $1 AND asset_type = $2");
        sqlx::query_as::<_, Asset>(&query)
            .bind(id)
            .bind(asset_type.name())
            .fetch_optional(pool)
            .await
    }

    /// List every asset in a project, ordered by type then ID.
    pub async fn list_by_project(pool: &PgPool, project_id: DbId) -> Result<Vec<Asset>, sqlx::Error> {
        let query = format!(
            "SELECT {ASSET_COLUMNS} FROM assets
             WHERE project_id = $1
             ORDER BY asset_type ASC, id ASC"
        );
        sqlx::query_as::<_, Asset>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// Find the approved-image slot for a key.
    pub async fn find_image(pool: &PgPool, key: &AssetKey) -> Result<Option<AssetImage>, sqlx::Error> {
        let query = format!(
            "SELECT {IMAGE_COLUMNS} FROM asset_images
             WHERE asset_id = $1 AND sub_type IS NOT DISTINCT FROM $2"
        );
        sqlx::query_as::<_, AssetImage>(&query)
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .fetch_optional(pool)
            .await
    }

    /// Copy a selected variant's image onto the slot and mark it approved.
    pub async fn set_approved(
        pool: &PgPool,
        key: &AssetKey,
        image: &ApprovedImage,
    ) -> Result<AssetImage, sqlx::Error> {
        let query = format!(
            "INSERT INTO asset_images
                (asset_id, sub_type, approved_image_url, approved_image_path, approved_at,
                 generation_status_id, selected_model)
             VALUES ($1, $2, $3, $4, NOW(), $5, $6)
             {SLOT_CONFLICT} DO UPDATE SET
                approved_image_url   = EXCLUDED.approved_image_url,
                approved_image_path  = EXCLUDED.approved_image_path,
                approved_at          = EXCLUDED.approved_at,
                generation_status_id = EXCLUDED.generation_status_id,
                selected_model       = EXCLUDED.selected_model,
                updated_at           = NOW()
             RETURNING {IMAGE_COLUMNS}"
        );
        sqlx::query_as::<_, AssetImage>(&query)
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .bind(&image.image_url)
            .bind(&image.storage_path)
            .bind(AssetStatus::Approved.id())
            .bind(&image.model)
            .fetch_one(pool)
            .await
    }

    /// Clear the approved fields of a slot and reset it to `pending`.
    pub async fn clear_approved(pool: &PgPool, key: &AssetKey) -> Result<AssetImage, sqlx::Error> {
        let query = format!(
            "INSERT INTO asset_images (asset_id, sub_type, generation_status_id)
             VALUES ($1, $2, $3)
             {SLOT_CONFLICT} DO UPDATE SET
                approved_image_url   = NULL,
                approved_image_path  = NULL,
                approved_at          = NULL,
                selected_model       = NULL,
                generation_status_id = EXCLUDED.generation_status_id,
                updated_at           = NOW()
             RETURNING {IMAGE_COLUMNS}"
        );
        sqlx::query_as::<_, AssetImage>(&query)
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .bind(AssetStatus::Pending.id())
            .fetch_one(pool)
            .await
    }

    /// Set the slot's generation status. An `approved` slot keeps its
    /// status; only selection changes move it out of `approved`.
    pub async fn set_generation_status(
        pool: &PgPool,
        key: &AssetKey,
        status: AssetStatus,
    ) -> Result<AssetImage, sqlx::Error> {
        let query = format!(
            "INSERT INTO asset_images (asset_id, sub_type, generation_status_id)
             VALUES ($1, $2, $3)
             {SLOT_CONFLICT} DO UPDATE SET
                generation_status_id = CASE
                    WHEN asset_images.generation_status_id = $4
                        THEN asset_images.generation_status_id
                    ELSE EXCLUDED.generation_status_id
                END,
                updated_at = NOW()
             RETURNING {IMAGE_COLUMNS}"
        );
        sqlx::query_as::<_, AssetImage>(&query)
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .bind(status.id())
            .bind(AssetStatus::Approved.id())
            .fetch_one(pool)
            .await
    }
}
