//! Stuck-job recovery.
//!
//! Callbacks are not guaranteed to arrive. Variants left `generating` past
//! their model's threshold are moved to `failed` with a timeout message so
//! they can be deleted and regenerated.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use storyframe_core::asset::AssetKey;
use storyframe_core::stuck::{
    cutoff, stuck_error_message, validate_threshold_minutes, StuckThresholds,
};
use storyframe_core::types::Timestamp;

use crate::error::PipelineResult;
use crate::resolver::settle_failed_slot;
use crate::store::{AssetStore, VariantStore};

pub struct StuckJobRecovery {
    variants: Arc<dyn VariantStore>,
    assets: Arc<dyn AssetStore>,
    thresholds: StuckThresholds,
}

impl StuckJobRecovery {
    pub fn new(
        variants: Arc<dyn VariantStore>,
        assets: Arc<dyn AssetStore>,
        thresholds: StuckThresholds,
    ) -> Self {
        Self {
            variants,
            assets,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &StuckThresholds {
        &self.thresholds
    }

    /// Fail stuck variants, scoped to one slot or global.
    ///
    /// `max_age_minutes` overrides every per-model threshold. Returns the
    /// number of variants reset.
    pub async fn sweep_stuck(
        &self,
        scope: Option<&AssetKey>,
        max_age_minutes: Option<i64>,
    ) -> PipelineResult<usize> {
        self.sweep_stuck_as_of(Utc::now(), scope, max_age_minutes)
            .await
    }

    /// [`Self::sweep_stuck`] evaluated at `now`.
    pub async fn sweep_stuck_as_of(
        &self,
        now: Timestamp,
        scope: Option<&AssetKey>,
        max_age_minutes: Option<i64>,
    ) -> PipelineResult<usize> {
        if let Some(minutes) = max_age_minutes {
            validate_threshold_minutes(minutes)?;
        }

        // Nothing younger than the smallest threshold can be stuck.
        let scan_minutes = max_age_minutes.unwrap_or_else(|| self.thresholds.min_minutes());
        let candidates = self
            .variants
            .list_stuck(scope, cutoff(now, scan_minutes))
            .await?;

        let mut reset = 0;
        let mut touched: HashSet<AssetKey> = HashSet::new();
        for variant in candidates {
            let minutes =
                max_age_minutes.unwrap_or_else(|| self.thresholds.minutes_for(&variant.model));
            let model_cutoff = cutoff(now, minutes);
            if variant.created_at >= model_cutoff {
                continue;
            }

            if self
                .variants
                .fail_if_stuck(variant.id, model_cutoff, &stuck_error_message(minutes))
                .await?
            {
                tracing::warn!(
                    variant_id = variant.id,
                    model = %variant.model,
                    threshold_minutes = minutes,
                    "Stuck variant marked failed",
                );
                reset += 1;
                touched.insert(variant.key());
            }
        }

        for key in &touched {
            settle_failed_slot(self.variants.as_ref(), self.assets.as_ref(), key).await?;
        }

        if reset > 0 {
            tracing::info!(reset, scope = ?scope.map(ToString::to_string), "Stuck sweep finished");
        }
        Ok(reset)
    }
}
