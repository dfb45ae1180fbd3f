//! The single idempotent "resolve variant" operation.
//!
//! Both result entry points funnel through [`VariantResolver`]: the fast
//! path right after a synchronous dispatch, and the webhook path when the
//! Generation Service calls back. Only a `generating` variant is ever
//! touched, and the final write is conditional on that status, so a second
//! writer is a no-op. A writer that uploads but then loses the race deletes
//! its own blob.

use std::sync::Arc;

use storyframe_core::asset::AssetKey;
use storyframe_core::status::{AssetStatus, VariantStatus};
use storyframe_db::models::variant::Variant;
use storyframe_generation::CallbackResult;
use storyframe_storage::{BlobDestination, BlobPersister};

use crate::error::PipelineResult;
use crate::store::{AssetStore, VariantStore};

/// Which entry point delivered the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvePath {
    /// Image returned synchronously by the dispatch; single persistence attempt.
    FastPath,
    /// Image delivered by callback; persistence waits and retries.
    Webhook,
}

/// What the resolver did with a result.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    /// Persisted and moved to `ready`.
    Ready(Variant),
    /// Moved to `failed` because the upstream job reported an error.
    Failed(Variant),
    /// Persistence failed softly; the variant stays `generating`.
    Pending,
    /// The variant was no longer `generating`; nothing changed.
    Skipped,
}

/// Applies a generation result to a variant.
pub struct VariantResolver {
    variants: Arc<dyn VariantStore>,
    assets: Arc<dyn AssetStore>,
    persister: Arc<BlobPersister>,
}

impl VariantResolver {
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

    /// Apply an image URL or an upstream error to `variant`.
    pub async fn resolve(
        &self,
        variant: &Variant,
        result: &CallbackResult,
        path: ResolvePath,
    ) -> PipelineResult<ResolveOutcome> {
        match result {
            CallbackResult::Image(url) => self.resolve_image(variant, url, path).await,
            CallbackResult::Error(error) => self.resolve_error(variant, error).await,
        }
    }

    /// Persist `image_url` and move the variant to `ready`.
    pub async fn resolve_image(
        &self,
        variant: &Variant,
        image_url: &str,
        path: ResolvePath,
    ) -> PipelineResult<ResolveOutcome> {
        if variant.status != VariantStatus::Generating {
            tracing::debug!(
                variant_id = variant.id,
                status = %variant.status,
                "Variant already resolved, ignoring result",
            );
            return Ok(ResolveOutcome::Skipped);
        }

        let dest = BlobDestination {
            key: variant.key(),
            variant_id: variant.id,
        };
        let stored = match path {
            ResolvePath::FastPath => self.persister.persist(image_url, &dest).await,
            ResolvePath::Webhook => self.persister.persist_with_retry(image_url, &dest).await,
        };
        let Some(blob) = stored else {
            tracing::warn!(
                variant_id = variant.id,
                ?path,
                "Result not persisted, variant left generating",
            );
            return Ok(ResolveOutcome::Pending);
        };

        match self
            .variants
            .mark_ready(variant.id, &blob.url, &blob.path)
            .await?
        {
            Some(ready) => {
                self.assets
                    .set_generation_status(&dest.key, AssetStatus::Ready)
                    .await?;
                tracing::info!(
                    variant_id = ready.id,
                    key = %dest.key,
                    model = %ready.model,
                    ?path,
                    "Variant ready",
                );
                Ok(ResolveOutcome::Ready(ready))
            }
            None => {
                tracing::info!(
                    variant_id = variant.id,
                    ?path,
                    "Variant resolved concurrently, discarding duplicate upload",
                );
                self.persister.discard(&dest.key, &blob.path).await;
                Ok(ResolveOutcome::Skipped)
            }
        }
    }

    /// Record an upstream failure.
    pub async fn resolve_error(
        &self,
        variant: &Variant,
        error: &str,
    ) -> PipelineResult<ResolveOutcome> {
        match self.variants.mark_failed(variant.id, error).await? {
            Some(failed) => {
                tracing::warn!(variant_id = failed.id, error, "Variant generation failed");
                settle_failed_slot(self.variants.as_ref(), self.assets.as_ref(), &failed.key())
                    .await?;
                Ok(ResolveOutcome::Failed(failed))
            }
            None => Ok(ResolveOutcome::Skipped),
        }
    }
}

/// Mark the slot `failed` once every one of its variants has failed.
pub(crate) async fn settle_failed_slot(
    variants: &dyn VariantStore,
    assets: &dyn AssetStore,
    key: &AssetKey,
) -> PipelineResult<()> {
    let slot = variants.list_by_key(key).await?;
    if !slot.is_empty() && slot.iter().all(|v| v.status == VariantStatus::Failed) {
        assets
            .set_generation_status(key, AssetStatus::Failed)
            .await?;
    }
    Ok(())
}
