//! Persistence seams for the pipeline.
//!
//! [`VariantStore`] and [`AssetStore`] expose only targeted conditional
//! writes (update-where-id, update-where-key). The PostgreSQL
//! implementations delegate to the zero-sized repositories in
//! `storyframe-db`.

use async_trait::async_trait;
use sqlx::PgPool;
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::status::AssetStatus;
use storyframe_core::types::{DbId, Timestamp};
use storyframe_db::models::asset::{ApprovedImage, Asset, AssetImage};
use storyframe_db::models::variant::{CreateVariant, Variant};
use storyframe_db::repositories::{AssetRepo, VariantRepo};

/// Failures of the persistence layer. Always fatal to the calling operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Variant store
// ---------------------------------------------------------------------------

/// Persistence for variant records.
#[async_trait]
pub trait VariantStore: Send + Sync {
    /// Insert a new `generating` variant.
    async fn create(&self, input: &CreateVariant) -> StoreResult<Variant>;

    async fn find(&self, id: DbId) -> StoreResult<Option<Variant>>;

    async fn find_by_job_id(&self, job_id: &str) -> StoreResult<Option<Variant>>;

    /// Variants of one slot ordered by `generation_order`, then id.
    async fn list_by_key(&self, key: &AssetKey) -> StoreResult<Vec<Variant>>;

    /// Variants of every slot of an asset.
    async fn list_by_asset(&self, asset_type: AssetType, asset_id: DbId)
        -> StoreResult<Vec<Variant>>;

    /// Selected variants of a slot, most recently updated first (ties: highest id).
    async fn list_selected(&self, key: &AssetKey) -> StoreResult<Vec<Variant>>;

    async fn max_generation_order(&self, key: &AssetKey) -> StoreResult<Option<i32>>;

    /// Record the job handle while the variant is still `generating`.
    async fn set_job_id(&self, id: DbId, job_id: &str) -> StoreResult<bool>;

    /// `generating` -> `ready`. `None` when the variant was no longer generating.
    async fn mark_ready(
        &self,
        id: DbId,
        image_url: &str,
        storage_path: &str,
    ) -> StoreResult<Option<Variant>>;

    /// `generating` -> `failed`. `None` when the variant was no longer generating.
    async fn mark_failed(&self, id: DbId, error_message: &str) -> StoreResult<Option<Variant>>;

    /// Revert every selected variant of the slot except `keep_id`.
    async fn deselect_siblings(&self, key: &AssetKey, keep_id: DbId) -> StoreResult<u64>;

    /// `ready|selected` -> `selected` for one row.
    async fn mark_selected(&self, id: DbId) -> StoreResult<Option<Variant>>;

    /// Make `id` the only selected variant of its slot.
    ///
    /// The default performs two conditional writes and can interleave with
    /// a concurrent selection; callers follow up with the duplicate-selection
    /// repair pass. Stores with transactions override this.
    async fn select_exclusive(&self, id: DbId) -> StoreResult<Option<Variant>> {
        let Some(target) = self.find(id).await? else {
            return Ok(None);
        };
        if !target.status.is_selectable() {
            return Ok(None);
        }
        self.deselect_siblings(&target.key(), id).await?;
        self.mark_selected(id).await
    }

    /// `selected` -> `ready`. `None` when the variant was not selected.
    async fn revert_selection(&self, id: DbId) -> StoreResult<Option<Variant>>;

    /// Delete a variant. Without `force`, a selected variant is kept.
    async fn delete(&self, id: DbId, force: bool) -> StoreResult<bool>;

    /// `generating` variants created before `cutoff`, optionally scoped.
    async fn list_stuck(
        &self,
        scope: Option<&AssetKey>,
        cutoff: Timestamp,
    ) -> StoreResult<Vec<Variant>>;

    /// Fail a variant only if it is still generating and older than `cutoff`.
    async fn fail_if_stuck(
        &self,
        id: DbId,
        cutoff: Timestamp,
        error_message: &str,
    ) -> StoreResult<bool>;

    /// The variant followed by its ancestors up to the root.
    async fn lineage(&self, id: DbId) -> StoreResult<Vec<Variant>>;
}

// ---------------------------------------------------------------------------
// Asset store
// ---------------------------------------------------------------------------

/// The narrow slice of the asset record the pipeline reads and writes.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get_asset(&self, asset_type: AssetType, id: DbId) -> StoreResult<Option<Asset>>;

    async fn list_project_assets(&self, project_id: DbId) -> StoreResult<Vec<Asset>>;

    async fn find_image(&self, key: &AssetKey) -> StoreResult<Option<AssetImage>>;

    /// Point the slot at an approved image and mark it `approved`.
    async fn set_approved(&self, key: &AssetKey, image: &ApprovedImage) -> StoreResult<()>;

    /// Clear the approved fields and reset the slot to `pending`.
    async fn clear_approved(&self, key: &AssetKey) -> StoreResult<()>;

    /// Update generation status. An `approved` slot is never downgraded.
    async fn set_generation_status(&self, key: &AssetKey, status: AssetStatus)
        -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// [`VariantStore`] backed by [`VariantRepo`].
#[derive(Clone)]
pub struct PgVariantStore {
    pool: PgPool,
}

impl PgVariantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VariantStore for PgVariantStore {
    async fn create(&self, input: &CreateVariant) -> StoreResult<Variant> {
        Ok(VariantRepo::create(&self.pool, input).await?)
    }

    async fn find(&self, id: DbId) -> StoreResult<Option<Variant>> {
        Ok(VariantRepo::find_by_id(&self.pool, id).await?)
    }

    async fn find_by_job_id(&self, job_id: &str) -> StoreResult<Option<Variant>> {
        Ok(VariantRepo::find_by_job_id(&self.pool, job_id).await?)
    }

    async fn list_by_key(&self, key: &AssetKey) -> StoreResult<Vec<Variant>> {
        Ok(VariantRepo::list_by_key(&self.pool, key).await?)
    }

    async fn list_by_asset(
        &self,
        asset_type: AssetType,
        asset_id: DbId,
    ) -> StoreResult<Vec<Variant>> {
        Ok(VariantRepo::list_by_asset(&self.pool, asset_type, asset_id).await?)
    }

    async fn list_selected(&self, key: &AssetKey) -> StoreResult<Vec<Variant>> {
        Ok(VariantRepo::list_selected(&self.pool, key).await?)
    }

    async fn max_generation_order(&self, key: &AssetKey) -> StoreResult<Option<i32>> {
        Ok(VariantRepo::max_generation_order(&self.pool, key).await?)
    }

    async fn set_job_id(&self, id: DbId, job_id: &str) -> StoreResult<bool> {
        Ok(VariantRepo::set_job_id(&self.pool, id, job_id).await?)
    }

    async fn mark_ready(
        &self,
        id: DbId,
        image_url: &str,
        storage_path: &str,
    ) -> StoreResult<Option<Variant>> {
        Ok(VariantRepo::mark_ready(&self.pool, id, image_url, storage_path).await?)
    }

    async fn mark_failed(&self, id: DbId, error_message: &str) -> StoreResult<Option<Variant>> {
        Ok(VariantRepo::mark_failed(&self.pool, id, error_message).await?)
    }

    async fn deselect_siblings(&self, key: &AssetKey, keep_id: DbId) -> StoreResult<u64> {
        Ok(VariantRepo::deselect_siblings(&self.pool, key, keep_id).await?)
    }

    async fn mark_selected(&self, id: DbId) -> StoreResult<Option<Variant>> {
        Ok(VariantRepo::mark_selected(&self.pool, id).await?)
    }

    async fn select_exclusive(&self, id: DbId) -> StoreResult<Option<Variant>> {
        Ok(VariantRepo::select_exclusive(&self.pool, id).await?)
    }

    async fn revert_selection(&self, id: DbId) -> StoreResult<Option<Variant>> {
        Ok(VariantRepo::revert_selection(&self.pool, id).await?)
    }

    async fn delete(&self, id: DbId, force: bool) -> StoreResult<bool> {
        let deleted = if force {
            VariantRepo::force_delete(&self.pool, id).await?
        } else {
            VariantRepo::delete_unselected(&self.pool, id).await?
        };
        Ok(deleted)
    }

    async fn list_stuck(
        &self,
        scope: Option<&AssetKey>,
        cutoff: Timestamp,
    ) -> StoreResult<Vec<Variant>> {
        Ok(VariantRepo::list_stuck(&self.pool, scope, cutoff).await?)
    }

    async fn fail_if_stuck(
        &self,
        id: DbId,
        cutoff: Timestamp,
        error_message: &str,
    ) -> StoreResult<bool> {
        Ok(VariantRepo::fail_if_stuck(&self.pool, id, cutoff, error_message).await?)
    }

    async fn lineage(&self, id: DbId) -> StoreResult<Vec<Variant>> {
        Ok(VariantRepo::list_lineage(&self.pool, id).await?)
    }
}

/// [`AssetStore`] backed by [`AssetRepo`].
#[derive(Clone)]
pub struct PgAssetStore {
    pool: PgPool,
}

impl PgAssetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetStore for PgAssetStore {
    async fn get_asset(&self, asset_type: AssetType, id: DbId) -> StoreResult<Option<Asset>> {
        Ok(AssetRepo::find(&self.pool, asset_type, id).await?)
    }

    async fn list_project_assets(&self, project_id: DbId) -> StoreResult<Vec<Asset>> {
        Ok(AssetRepo::list_by_project(&self.pool, project_id).await?)
    }

    async fn find_image(&self, key: &AssetKey) -> StoreResult<Option<AssetImage>> {
        Ok(AssetRepo::find_image(&self.pool, key).await?)
    }

    async fn set_approved(&self, key: &AssetKey, image: &ApprovedImage) -> StoreResult<()> {
        AssetRepo::set_approved(&self.pool, key, image).await?;
        Ok(())
    }

    async fn clear_approved(&self, key: &AssetKey) -> StoreResult<()> {
        AssetRepo::clear_approved(&self.pool, key).await?;
        Ok(())
    }

    async fn set_generation_status(
        &self,
        key: &AssetKey,
        status: AssetStatus,
    ) -> StoreResult<()> {
        AssetRepo::set_generation_status(&self.pool, key, status).await?;
        Ok(())
    }
}
