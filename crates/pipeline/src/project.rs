//! Project-wide generation.
//!
//! Runs one fan-out per asset slot through the batch controller so a whole
//! project can be generated without flooding the Generation Service.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storyframe_core::asset::{AssetKey, AssetType};
use storyframe_core::generation_model::validate_models;
use storyframe_core::prompt::{PromptContext, StandardPromptBuilder};
use storyframe_core::status::{AssetStatus, VariantStatus};
use storyframe_core::types::DbId;
use storyframe_db::models::asset::Asset;

use crate::batch::{run_batched, BatchOptions, BatchProgress, ProgressFn, TaskOutcome};
use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::fanout::{FanOutOptions, FanOutOrchestrator};
use crate::store::{AssetStore, VariantStore};

/// Sub-type generated for characters when the caller names none.
pub const DEFAULT_CHARACTER_SUB_TYPE: &str = "portrait";

/// What to generate across a project.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRunRequest {
    pub models: Vec<String>,
    #[serde(default)]
    pub style: Option<String>,
    /// Character slots to fill. Defaults to a single portrait slot.
    #[serde(default)]
    pub character_sub_types: Vec<String>,
    /// Leave slots that already have an approved image alone.
    #[serde(default = "default_true")]
    pub skip_approved: bool,
}

fn default_true() -> bool {
    true
}

/// Summary of a project run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectRunReport {
    pub project_id: DbId,
    pub slots: usize,
    pub skipped_approved: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub variant_ids: Vec<DbId>,
}

/// Variant counts across a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectProgress {
    pub project_id: DbId,
    pub assets: usize,
    pub generating: usize,
    pub ready: usize,
    pub failed: usize,
    pub selected: usize,
}

impl ProjectProgress {
    pub fn is_idle(&self) -> bool {
        self.generating == 0
    }
}

pub struct ProjectGenerator {
    variants: Arc<dyn VariantStore>,
    assets: Arc<dyn AssetStore>,
    fanout: Arc<FanOutOrchestrator>,
    batch: BatchOptions,
    max_models: usize,
}

impl ProjectGenerator {
    pub fn new(
        variants: Arc<dyn VariantStore>,
        assets: Arc<dyn AssetStore>,
        fanout: Arc<FanOutOrchestrator>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            variants,
            assets,
            fanout,
            batch: config.project_batch.clone(),
            max_models: config.max_models_per_fanout,
        }
    }

    /// Slots a project run would cover for `asset`.
    fn slots_for(asset: &Asset, request: &ProjectRunRequest) -> Vec<AssetKey> {
        match asset.asset_type {
            AssetType::Character if request.character_sub_types.is_empty() => {
                vec![AssetKey::new(
                    asset.asset_type,
                    asset.id,
                    Some(DEFAULT_CHARACTER_SUB_TYPE.to_string()),
                )]
            }
            AssetType::Character => request
                .character_sub_types
                .iter()
                .map(|sub| AssetKey::new(asset.asset_type, asset.id, Some(sub.clone())))
                .collect(),
            _ => vec![AssetKey::whole(asset.asset_type, asset.id)],
        }
    }

    /// Fan out every slot of the project, `project_batch` slots at a time.
    ///
    /// A slot whose fan-out fails or times out is counted and the run moves on.
    pub async fn generate_for_project(
        &self,
        project_id: DbId,
        request: &ProjectRunRequest,
    ) -> PipelineResult<ProjectRunReport> {
        validate_models(&request.models, self.max_models)?;
        let assets = self.assets.list_project_assets(project_id).await?;

        let mut report = ProjectRunReport {
            project_id,
            ..ProjectRunReport::default()
        };
        let mut work: Vec<(&Asset, AssetKey)> = Vec::new();
        for asset in &assets {
            for key in Self::slots_for(asset, request) {
                if request.skip_approved && self.is_approved(&key).await? {
                    report.skipped_approved += 1;
                    continue;
                }
                work.push((asset, key));
            }
        }
        report.slots = work.len();

        let tasks: Vec<_> = work
            .iter()
            .map(|(asset, key)| async move {
                let context = PromptContext {
                    asset_name: &asset.name,
                    visual_description: asset.visual_description.as_deref(),
                    style: request.style.as_deref(),
                    ..PromptContext::default()
                };
                self.fanout
                    .generate_variants(
                        key,
                        &request.models,
                        &StandardPromptBuilder,
                        &context,
                        FanOutOptions::default(),
                    )
                    .await
            })
            .collect();

        let log_progress = |p: BatchProgress| {
            tracing::info!(
                project_id,
                batch = p.batch_index + 1,
                of = p.batch_count,
                completed = p.completed,
                total = p.total,
                failed = p.failed,
                "Project generation progress",
            );
        };
        let outcomes = run_batched(
            tasks,
            &self.batch,
            Some(&log_progress as &ProgressFn<'_>),
        )
        .await;

        for ((_, key), outcome) in work.iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Completed(ids) => {
                    report.succeeded += 1;
                    report.variant_ids.extend(ids);
                }
                TaskOutcome::Failed(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        project_id,
                        key = %key,
                        error = %error,
                        "Slot generation failed",
                    );
                }
                TaskOutcome::TimedOut => {
                    report.timed_out += 1;
                    tracing::warn!(project_id, key = %key, "Slot generation timed out");
                }
            }
        }

        tracing::info!(
            project_id,
            slots = report.slots,
            succeeded = report.succeeded,
            failed = report.failed,
            timed_out = report.timed_out,
            "Project generation finished",
        );
        Ok(report)
    }

    /// Count variants per status across every asset of a project.
    pub async fn generation_progress(&self, project_id: DbId) -> PipelineResult<ProjectProgress> {
        let assets = self.assets.list_project_assets(project_id).await?;
        let mut progress = ProjectProgress {
            project_id,
            assets: assets.len(),
            ..ProjectProgress::default()
        };

        for asset in &assets {
            for variant in self.variants.list_by_asset(asset.asset_type, asset.id).await? {
                match variant.status {
                    VariantStatus::Generating => progress.generating += 1,
                    VariantStatus::Ready => progress.ready += 1,
                    VariantStatus::Failed => progress.failed += 1,
                    VariantStatus::Selected => progress.selected += 1,
                }
            }
        }
        Ok(progress)
    }

    async fn is_approved(&self, key: &AssetKey) -> PipelineResult<bool> {
        Ok(self
            .assets
            .find_image(key)
            .await?
            .is_some_and(|image| image.generation_status == AssetStatus::Approved))
    }
}
