//! Refinement chains: deriving a new variant from an existing image.
//!
//! The refinement prompt is sent verbatim. The source image already
//! carries the earlier prompt's visual context, so the original prompt is
//! never prepended.

use std::sync::Arc;

use storyframe_core::generation_model::{image_to_image_model, validate_model};
use storyframe_core::prompt::validate_prompt;
use storyframe_core::status::AssetStatus;
use storyframe_core::types::DbId;
use storyframe_db::models::variant::{CreateVariant, Variant};
use storyframe_generation::GenerationRequest;

use crate::batch::TaskOutcome;
use crate::error::{PipelineError, PipelineResult};
use crate::fanout::FanOutOrchestrator;
use crate::resolver::ResolveOutcome;
use crate::store::{AssetStore, VariantStore};

/// A refinement variant that has been created but not dispatched.
#[derive(Debug, Clone)]
pub struct PreparedRefinement {
    pub variant: Variant,
    pub request: GenerationRequest,
}

pub struct RefinementManager {
    variants: Arc<dyn VariantStore>,
    assets: Arc<dyn AssetStore>,
    fanout: Arc<FanOutOrchestrator>,
}

impl RefinementManager {
    pub fn new(
        variants: Arc<dyn VariantStore>,
        assets: Arc<dyn AssetStore>,
        fanout: Arc<FanOutOrchestrator>,
    ) -> Self {
        Self {
            variants,
            assets,
            fanout,
        }
    }

    /// Create a child of `source_id` and dispatch it. Returns the new id.
    pub async fn refine(
        &self,
        source_id: DbId,
        model: &str,
        refinement_prompt: &str,
    ) -> PipelineResult<DbId> {
        let prepared = self
            .create_refinement(source_id, model, refinement_prompt)
            .await?;
        let id = prepared.variant.id;
        self.dispatch(prepared).await;
        Ok(id)
    }

    /// Validate and create the child variant without dispatching it.
    pub async fn create_refinement(
        &self,
        source_id: DbId,
        model: &str,
        refinement_prompt: &str,
    ) -> PipelineResult<PreparedRefinement> {
        validate_model(model)?;
        let prompt = refinement_prompt.trim();
        validate_prompt(prompt)?;

        let source = self
            .variants
            .find(source_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Variant", source_id))?;
        if source.image_url.is_empty() {
            return Err(PipelineError::validation(format!(
                "Variant {source_id} has no image to refine"
            )));
        }

        let key = source.key();
        let order = self
            .variants
            .max_generation_order(&key)
            .await?
            .map_or(0, |max| max + 1);
        let model = image_to_image_model(model);

        let input = CreateVariant::for_key(&key, &model, prompt, order).with_parent(source.id);
        let variant = self.variants.create(&input).await?;
        self.assets
            .set_generation_status(&key, AssetStatus::Generating)
            .await?;

        let request = self
            .fanout
            .request_for(prompt, &variant)
            .with_source_image(&source.image_url);

        tracing::info!(
            variant_id = variant.id,
            parent_variant_id = source.id,
            model = %model,
            "Refinement variant created",
        );
        Ok(PreparedRefinement { variant, request })
    }

    /// Dispatch a prepared refinement through the fan-out path.
    pub async fn dispatch(&self, prepared: PreparedRefinement) -> TaskOutcome<ResolveOutcome> {
        let outcome = self
            .fanout
            .execute_bounded(&prepared.variant, &prepared.request)
            .await;
        if !outcome.is_completed() {
            tracing::warn!(
                variant_id = prepared.variant.id,
                ?outcome,
                "Refinement dispatch did not complete, awaiting callback",
            );
        }
        outcome
    }

    /// The variant followed by its ancestors, back to the root.
    pub async fn lineage(&self, id: DbId) -> PipelineResult<Vec<Variant>> {
        let chain = self.variants.lineage(id).await?;
        if chain.is_empty() {
            return Err(PipelineError::not_found("Variant", id));
        }
        Ok(chain)
    }
}
