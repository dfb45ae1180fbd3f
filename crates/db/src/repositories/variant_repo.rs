//! Repository for the `variants` table.
//!
//! Every state transition is a targeted conditional write (`WHERE id = ..
//! AND status_id = ..`) so that a writer that lost a race affects zero rows
//! instead of clobbering the winner.

use sqlx::PgPool;
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::status::VariantStatus;
use storyframe_core::types::{DbId, Timestamp};

use crate::models::variant::{CreateVariant, Variant};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, asset_type, asset_id, sub_type, model, prompt, image_url, \
    storage_path, status_id, is_selected, generation_order, parent_variant_id, job_id, \
    error_message, created_at, updated_at";

/// Slot predicate on `$1, $2, $3` = asset_type, asset_id, sub_type.
const SLOT_FILTER: &str =
    "asset_type = $1 AND asset_id = $2 AND sub_type IS NOT DISTINCT FROM $3";

/// PostgreSQL unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

/// Provides CRUD and conditional state transitions for variants.
pub struct VariantRepo;

impl VariantRepo {
    /// Insert a new variant in `generating`, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateVariant) -> Result<Variant, sqlx::Error> {
        let query = format!(
            "INSERT INTO variants
                (asset_type, asset_id, sub_type, model, prompt, status_id,
                 generation_order, parent_variant_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(input.asset_type.name())
            .bind(input.asset_id)
            .bind(&input.sub_type)
            .bind(&input.model)
            .bind(&input.prompt)
            .bind(VariantStatus::Generating.id())
            .bind(input.generation_order)
            .bind(input.parent_variant_id)
            .fetch_one(pool)
            .await
    }

    /// Find a variant by its internal ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM variants WHERE id = $1");
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the variant that owns a Generation Service task.
    pub async fn find_by_job_id(
        pool: &PgPool,
        job_id: &str,
    ) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM variants WHERE job_id = $1");
        sqlx::query_as::<_, Variant>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }

    /// List the variants competing for one slot in display order.
    pub async fn list_by_key(pool: &PgPool, key: &AssetKey) -> Result<Vec<Variant>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM variants
             WHERE {SLOT_FILTER}
             ORDER BY generation_order ASC, id ASC"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(key.asset_type.name())
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .fetch_all(pool)
            .await
    }

    /// List every variant of an asset across all sub-type slots.
    pub async fn list_by_asset(
        pool: &PgPool,
        asset_type: AssetType,
        asset_id: DbId,
    ) -> Result<Vec<Variant>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM variants
             WHERE asset_type = $1 AND asset_id = $2
             ORDER BY sub_type NULLS FIRST, generation_order ASC, id ASC"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(asset_type.name())
            .bind(asset_id)
            .fetch_all(pool)
            .await
    }

    /// List selected variants in a slot, most recently updated first.
    pub async fn list_selected(pool: &PgPool, key: &AssetKey) -> Result<Vec<Variant>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM variants
             WHERE {SLOT_FILTER} AND is_selected = true
             ORDER BY updated_at DESC, id DESC"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(key.asset_type.name())
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .fetch_all(pool)
            .await
    }

    /// Highest `generation_order` in a slot, or `None` if the slot is empty.
    pub async fn max_generation_order(
        pool: &PgPool,
        key: &AssetKey,
    ) -> Result<Option<i32>, sqlx::Error> {
        let query = format!("SELECT MAX(generation_order) FROM variants WHERE {SLOT_FILTER}");
        let row: (Option<i32>,) = sqlx::query_as(&query)
            .bind(key.asset_type.name())
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .fetch_one(pool)
            .await?;
        Ok(row.0)
    }

    /// Record the Generation Service task id on a still-generating variant.
    pub async fn set_job_id(pool: &PgPool, id: DbId, job_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE variants SET job_id = $2, updated_at = NOW()
             WHERE id = $1 AND status_id = $3",
        )
        .bind(id)
        .bind(job_id)
        .bind(VariantStatus::Generating.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `generating` -> `ready` with the durable image location.
    ///
    /// Returns `None` when the variant is no longer generating (another
    /// writer resolved it first).
    pub async fn mark_ready(
        pool: &PgPool,
        id: DbId,
        image_url: &str,
        storage_path: &str,
    ) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!(
            "UPDATE variants
             SET status_id = $4, image_url = $2, storage_path = $3,
                 error_message = NULL, updated_at = NOW()
             WHERE id = $1 AND status_id = $5
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .bind(image_url)
            .bind(storage_path)
            .bind(VariantStatus::Ready.id())
            .bind(VariantStatus::Generating.id())
            .fetch_optional(pool)
            .await
    }

    /// `generating` -> `failed` with an error message.
    pub async fn mark_failed(
        pool: &PgPool,
        id: DbId,
        error_message: &str,
    ) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!(
            "UPDATE variants
             SET status_id = $3, error_message = $2, updated_at = NOW()
             WHERE id = $1 AND status_id = $4
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .bind(error_message)
            .bind(VariantStatus::Failed.id())
            .bind(VariantStatus::Generating.id())
            .fetch_optional(pool)
            .await
    }

    /// Select a variant and deselect its siblings in one transaction.
    ///
    /// The target row is locked first, so concurrent selections in the same
    /// slot serialize on it. If a racing transaction on a different target
    /// commits first, the `uq_variants_one_selected` index rejects this one
    /// and it is retried once against the now-committed state.
    ///
    /// Returns `None` if the target does not exist or is not selectable.
    pub async fn select_exclusive(pool: &PgPool, id: DbId) -> Result<Option<Variant>, sqlx::Error> {
        match Self::try_select_exclusive(pool, id).await {
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                tracing::debug!(variant_id = id, "Concurrent selection detected, retrying");
                Self::try_select_exclusive(pool, id).await
            }
            other => other,
        }
    }

    async fn try_select_exclusive(pool: &PgPool, id: DbId) -> Result<Option<Variant>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let lock_query = format!("SELECT {COLUMNS} FROM variants WHERE id = $1 FOR UPDATE");
        let Some(target) = sqlx::query_as::<_, Variant>(&lock_query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        if !target.status.is_selectable() {
            return Ok(None);
        }

        let deselect = format!(
            "UPDATE variants
             SET is_selected = false, status_id = $5, updated_at = NOW()
             WHERE {SLOT_FILTER} AND is_selected = true AND id <> $4"
        );
        sqlx::query(&deselect)
            .bind(target.asset_type.name())
            .bind(target.asset_id)
            .bind(&target.sub_type)
            .bind(id)
            .bind(VariantStatus::Ready.id())
            .execute(&mut *tx)
            .await?;

        let select = format!(
            "UPDATE variants
             SET is_selected = true, status_id = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {COLUMNS}"
        );
        let selected = sqlx::query_as::<_, Variant>(&select)
            .bind(id)
            .bind(VariantStatus::Selected.id())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(selected))
    }

    /// Revert every selected sibling in the slot except `keep_id` to `ready`.
    pub async fn deselect_siblings(
        pool: &PgPool,
        key: &AssetKey,
        keep_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let query = format!(
            "UPDATE variants
             SET is_selected = false, status_id = $5, updated_at = NOW()
             WHERE {SLOT_FILTER} AND is_selected = true AND id <> $4"
        );
        let result = sqlx::query(&query)
            .bind(key.asset_type.name())
            .bind(key.asset_id)
            .bind(&key.sub_type)
            .bind(keep_id)
            .bind(VariantStatus::Ready.id())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// `ready|selected` -> `selected`.
    pub async fn mark_selected(pool: &PgPool, id: DbId) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!(
            "UPDATE variants
             SET is_selected = true, status_id = $2, updated_at = NOW()
             WHERE id = $1 AND status_id IN ($3, $2)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .bind(VariantStatus::Selected.id())
            .bind(VariantStatus::Ready.id())
            .fetch_optional(pool)
            .await
    }

    /// `selected` -> `ready`. Returns `None` if the variant was not selected.
    pub async fn revert_selection(pool: &PgPool, id: DbId) -> Result<Option<Variant>, sqlx::Error> {
        let query = format!(
            "UPDATE variants
             SET is_selected = false, status_id = $2, updated_at = NOW()
             WHERE id = $1 AND is_selected = true
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .bind(VariantStatus::Ready.id())
            .fetch_optional(pool)
            .await
    }

    /// Delete a variant only if it is not selected. Returns `true` if removed.
    pub async fn delete_unselected(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM variants WHERE id = $1 AND is_selected = false")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a variant regardless of selection. Returns `true` if removed.
    pub async fn force_delete(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM variants WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List `generating` variants created before `cutoff`, optionally
    /// scoped to one slot. Oldest first.
    pub async fn list_stuck(
        pool: &PgPool,
        scope: Option<&AssetKey>,
        cutoff: Timestamp,
    ) -> Result<Vec<Variant>, sqlx::Error> {
        match scope {
            Some(key) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM variants
                     WHERE {SLOT_FILTER} AND status_id = $4 AND created_at < $5
                     ORDER BY created_at ASC"
                );
                sqlx::query_as::<_, Variant>(&query)
                    .bind(key.asset_type.name())
                    .bind(key.asset_id)
                    .bind(&key.sub_type)
                    .bind(VariantStatus::Generating.id())
                    .bind(cutoff)
                    .fetch_all(pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {COLUMNS} FROM variants
                     WHERE status_id = $1 AND created_at < $2
                     ORDER BY created_at ASC"
                );
                sqlx::query_as::<_, Variant>(&query)
                    .bind(VariantStatus::Generating.id())
                    .bind(cutoff)
                    .fetch_all(pool)
                    .await
            }
        }
    }

    /// Number of variants still waiting on the Generation Service.
    pub async fn count_generating(pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM variants WHERE status_id = $1")
            .bind(VariantStatus::Generating.id())
            .fetch_one(pool)
            .await
    }

    /// `generating` -> `failed`, only if still generating and created
    /// before `cutoff`. Returns `true` if the row was transitioned.
    pub async fn fail_if_stuck(
        pool: &PgPool,
        id: DbId,
        cutoff: Timestamp,
        error_message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE variants
             SET status_id = $4, error_message = $3, updated_at = NOW()
             WHERE id = $1 AND status_id = $5 AND created_at < $2",
        )
        .bind(id)
        .bind(cutoff)
        .bind(error_message)
        .bind(VariantStatus::Failed.id())
        .bind(VariantStatus::Generating.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Return the refinement chain for a variant by following
    /// `parent_variant_id`, starting at the variant itself and ending at the
    /// root.
    pub async fn list_lineage(pool: &PgPool, id: DbId) -> Result<Vec<Variant>, sqlx::Error> {
        let query = format!(
            "WITH RECURSIVE chain AS (
                SELECT {COLUMNS}, 0 AS depth
                FROM variants
                WHERE id = $1
                UNION ALL
                SELECT v.id, v.asset_type, v.asset_id, v.sub_type, v.model, v.prompt,
                       v.image_url, v.storage_path, v.status_id, v.is_selected,
                       v.generation_order, v.parent_variant_id, v.job_id,
                       v.error_message, v.created_at, v.updated_at, c.depth + 1
                FROM variants v
                INNER JOIN chain c ON v.id = c.parent_variant_id
            )
            SELECT {COLUMNS} FROM chain ORDER BY depth ASC"
        );
        sqlx::query_as::<_, Variant>(&query)
            .bind(id)
            .fetch_all(pool)
            .await
    }
}
