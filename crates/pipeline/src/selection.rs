//! Selection state machine.
//!
//! ```text
//! ready ──select──► selected ──unselect──► ready
//! ```
//!
//! At most one variant per slot may be selected. The selected variant's
//! image, path and model are mirrored onto the asset slot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use storyframe_core::asset::AssetKey;
use storyframe_core::error::CoreError;
use storyframe_core::status::VariantStatus;
use storyframe_core::types::DbId;
use storyframe_db::models::asset::ApprovedImage;
use storyframe_db::models::variant::Variant;
use storyframe_storage::BlobPersister;

use crate::error::{PipelineError, PipelineResult};
use crate::store::{AssetStore, VariantStore};

/// Result of [`SelectionService::resolve_duplicate_selections`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionRepair {
    /// The selected variant after repair, if any.
    pub winner: Option<DbId>,
    /// Variants reverted to `ready`.
    pub reverted: Vec<DbId>,
}

/// Result of [`SelectionService::bulk_approve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkApproveReport {
    /// Variants selected by this run.
    pub approved: Vec<DbId>,
    /// Slots that already had a selection.
    pub already_selected: usize,
    /// Slots with no `ready` variant to pick.
    pub without_candidate: usize,
}

const MIRROR_ATTEMPTS: usize = 10;

fn approved_image(variant: &Variant) -> ApprovedImage {
    ApprovedImage {
        image_url: variant.image_url.clone(),
        storage_path: variant.storage_path.clone(),
        model: variant.model.clone(),
    }
}

pub struct SelectionService {
    variants: Arc<dyn VariantStore>,
    assets: Arc<dyn AssetStore>,
    persister: Arc<BlobPersister>,
}

impl SelectionService {
    pub fn new(
        variants: Arc<dyn VariantStore>,
        assets: Arc<dyn AssetStore>,
        persister: Arc<BlobPersister>,
    ) -> Self {
        Self {
            variants,
            assets,
            persister,
        }
    }

    async fn load(&self, id: DbId) -> PipelineResult<Variant> {
        self.variants
            .find(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Variant", id))
    }

    /// Make `id` the selected variant of its slot and approve its image.
    pub async fn select(&self, id: DbId) -> PipelineResult<Variant> {
        let variant = self.load(id).await?;
        if !variant.status.is_selectable() {
            return Err(PipelineError::validation(format!(
                "Variant {id} is {} and cannot be selected",
                variant.status
            )));
        }

        let selected = self
            .variants
            .select_exclusive(id)
            .await?
            .ok_or_else(|| {
                PipelineError::conflict(format!("Variant {id} changed state during selection"))
            })?;
        let key = selected.key();

        match self.mirror_selection(&key).await? {
            Some(winner) if winner.id == id => {
                tracing::info!(
                    variant_id = id,
                    key = %key,
                    model = %winner.model,
                    "Variant selected",
                );
                Ok(winner)
            }
            Some(winner) => Err(PipelineError::conflict(format!(
                "Variant {id} was superseded by a concurrent selection of variant {}",
                winner.id
            ))),
            None => Err(PipelineError::conflict(format!(
                "Variant {id} was unselected during selection"
            ))),
        }
    }

    /// Revert a selected variant to `ready` and clear the slot's approval.
    pub async fn unselect(&self, id: DbId) -> PipelineResult<Variant> {
        let variant = self.load(id).await?;
        if !variant.is_selected {
            return Err(PipelineError::validation(format!(
                "Variant {id} is not selected"
            )));
        }

        let reverted = self
            .variants
            .revert_selection(id)
            .await?
            .ok_or_else(|| {
                PipelineError::conflict(format!("Variant {id} changed state during unselect"))
            })?;
        self.clear_if_unselected(&reverted.key()).await?;

        tracing::info!(variant_id = id, "Variant unselected");
        Ok(reverted)
    }

    /// Repair a slot with more than one selected variant.
    ///
    /// Keeps the most recently updated selection (ties go to the highest
    /// id), reverts the others and re-points the slot at the winner.
    pub async fn resolve_duplicate_selections(
        &self,
        key: &AssetKey,
    ) -> PipelineResult<SelectionRepair> {
        let mut selected = self.variants.list_selected(key).await?;
        selected.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));

        let mut iter = selected.into_iter();
        let Some(winner) = iter.next() else {
            return Ok(SelectionRepair::default());
        };

        let mut reverted = Vec::new();
        for loser in iter {
            if self.variants.revert_selection(loser.id).await?.is_some() {
                reverted.push(loser.id);
            }
        }

        if !reverted.is_empty() {
            tracing::warn!(
                key = %key,
                winner = winner.id,
                reverted = ?reverted,
                "Repaired duplicate selections",
            );
            self.assets.set_approved(key, &approved_image(&winner)).await?;
        }

        Ok(SelectionRepair {
            winner: Some(winner.id),
            reverted,
        })
    }

    /// Delete a variant. A selected variant is refused unless `force`,
    /// in which case the slot's approval is cleared too.
    pub async fn delete(&self, id: DbId, force: bool) -> PipelineResult<()> {
        let variant = self.load(id).await?;
        if variant.is_selected && !force {
            return Err(PipelineError::conflict(format!(
                "Variant {id} is selected; unselect it before deleting"
            )));
        }

        if !self.variants.delete(id, force).await? {
            return Err(if force {
                PipelineError::not_found("Variant", id)
            } else {
                PipelineError::conflict(format!("Variant {id} was selected concurrently"))
            });
        }

        let key = variant.key();
        if variant.is_selected {
            self.clear_if_unselected(&key).await?;
        }
        self.persister.discard(&key, &variant.storage_path).await;

        tracing::info!(variant_id = id, force, "Variant deleted");
        Ok(())
    }

    /// Select the first `ready` variant of every slot in a project that has
    /// no selection yet.
    pub async fn bulk_approve(&self, project_id: DbId) -> PipelineResult<BulkApproveReport> {
        let mut report = BulkApproveReport::default();

        for asset in self.assets.list_project_assets(project_id).await? {
            let mut slots: BTreeMap<Option<String>, Vec<Variant>> = BTreeMap::new();
            for variant in self.variants.list_by_asset(asset.asset_type, asset.id).await? {
                slots.entry(variant.sub_type.clone()).or_default().push(variant);
            }

            for (_, slot) in slots {
                if slot.iter().any(|v| v.is_selected) {
                    report.already_selected += 1;
                    continue;
                }
                let candidate = slot
                    .iter()
                    .filter(|v| v.status == VariantStatus::Ready)
                    .min_by_key(|v| (v.generation_order, v.id));
                let Some(candidate) = candidate else {
                    report.without_candidate += 1;
                    continue;
                };

                match self.select(candidate.id).await {
                    Ok(selected) => report.approved.push(selected.id),
                    Err(PipelineError::Core(CoreError::Validation(msg)))
                    | Err(PipelineError::Core(CoreError::Conflict(msg))) => {
                        tracing::warn!(
                            variant_id = candidate.id,
                            error = %msg,
                            "Bulk approve skipped slot",
                        );
                        report.without_candidate += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        tracing::info!(
            project_id,
            approved = report.approved.len(),
            already_selected = report.already_selected,
            without_candidate = report.without_candidate,
            "Bulk approve finished",
        );
        Ok(report)
    }

    /// Point the slot's approval at the variant that is selected once
    /// duplicates are repaired, and return it.
    ///
    /// The write is confirmed against a fresh read of the selection; a
    /// selection committed in between sends the pass round again, so the
    /// last approval written always belongs to the latest selection.
    async fn mirror_selection(&self, key: &AssetKey) -> PipelineResult<Option<Variant>> {
        for _ in 0..MIRROR_ATTEMPTS {
            let Some(winner_id) = self.resolve_duplicate_selections(key).await?.winner else {
                self.assets.clear_approved(key).await?;
                return Ok(None);
            };
            let Some(winner) = self.variants.find(winner_id).await?.filter(|v| v.is_selected)
            else {
                continue;
            };
            self.assets.set_approved(key, &approved_image(&winner)).await?;

            let current = self.variants.list_selected(key).await?;
            if matches!(current.as_slice(), [only] if only.id == winner.id) {
                return Ok(Some(winner));
            }
        }

        Err(PipelineError::conflict(format!(
            "Selection of {key} kept changing; retry"
        )))
    }

    async fn clear_if_unselected(&self, key: &AssetKey) -> PipelineResult<()> {
        if self.variants.list_selected(key).await?.is_empty() {
            self.assets.clear_approved(key).await?;
        }
        Ok(())
    }
}
