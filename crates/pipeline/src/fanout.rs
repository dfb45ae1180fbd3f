//! Fan-out orchestration.
//!
//! One fan-out creates a variant per requested model, sequentially so that
//! `generation_order` is deterministic, then dispatches every model
//! concurrently. Results land through the fast path when the dispatch
//! returns an image, or later through [`FanOutOrchestrator::handle_callback`].

use std::sync::Arc;
use std::time::Duration;

use storyframe_core::asset::{validate_sub_type, AssetKey};
use storyframe_core::error::CoreError;
use storyframe_core::generation_model::validate_models;
use storyframe_core::prompt::{PromptBuilder, PromptContext};
use storyframe_core::status::AssetStatus;
use storyframe_core::types::DbId;
use storyframe_db::models::variant::{CreateVariant, Variant};
use storyframe_generation::{CallbackPayload, DispatchOutcome, GenerationClient, GenerationRequest};

use crate::batch::{run_batched, BatchOptions, TaskOutcome};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::resolver::{ResolveOutcome, ResolvePath, VariantResolver};
use crate::store::{AssetStore, VariantStore};

/// Per-call options of a fan-out.
#[derive(Debug, Clone, Default)]
pub struct FanOutOptions {
    /// Conditioning images sent with every model's request.
    pub reference_images: Vec<String>,
    /// Defaults to the Generation Service's square format.
    pub aspect_ratio: Option<String>,
}

/// Variants created for a fan-out, ready to be dispatched.
#[derive(Debug, Clone)]
pub struct PreparedFanOut {
    pub key: AssetKey,
    pub prompt: String,
    pub variants: Vec<Variant>,
    pub options: FanOutOptions,
}

impl PreparedFanOut {
    pub fn variant_ids(&self) -> Vec<DbId> {
        self.variants.iter().map(|v| v.id).collect()
    }
}

/// Creates and dispatches variants, and ingests callbacks.
pub struct FanOutOrchestrator {
    variants: Arc<dyn VariantStore>,
    assets: Arc<dyn AssetStore>,
    generator: Arc<dyn GenerationClient>,
    resolver: Arc<VariantResolver>,
    task_timeout: Duration,
    max_models: usize,
    callback_url: Option<String>,
}

impl FanOutOrchestrator {
    pub fn new(
        variants: Arc<dyn VariantStore>,
        assets: Arc<dyn AssetStore>,
        generator: Arc<dyn GenerationClient>,
        resolver: Arc<VariantResolver>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            variants,
            assets,
            generator,
            resolver,
            task_timeout: config.fanout_task_timeout,
            max_models: config.max_models_per_fanout,
            callback_url: config.callback_url.clone(),
        }
    }

    /// Create one variant per model and dispatch them all.
    ///
    /// Returns the created ids whatever the per-model outcome; callers
    /// inspect each variant's status.
    pub async fn generate_variants(
        &self,
        key: &AssetKey,
        models: &[String],
        prompt_builder: &dyn PromptBuilder,
        context: &PromptContext<'_>,
        options: FanOutOptions,
    ) -> PipelineResult<Vec<DbId>> {
        let prepared = self
            .create_variants(key, models, prompt_builder, context, options)
            .await?;
        let ids = prepared.variant_ids();
        self.dispatch(prepared).await;
        Ok(ids)
    }

    /// Validate the request, resolve the prompt once and create the
    /// `generating` variants. Nothing is dispatched yet.
    pub async fn create_variants(
        &self,
        key: &AssetKey,
        models: &[String],
        prompt_builder: &dyn PromptBuilder,
        context: &PromptContext<'_>,
        options: FanOutOptions,
    ) -> PipelineResult<PreparedFanOut> {
        validate_sub_type(key.sub_type())?;
        validate_models(models, self.max_models)?;
        if self
            .assets
            .get_asset(key.asset_type, key.asset_id)
            .await?
            .is_none()
        {
            return Err(PipelineError::not_found("Asset", key.asset_id));
        }

        let context = PromptContext {
            has_reference_images: !options.reference_images.is_empty(),
            ..context.clone()
        };
        let prompt = prompt_builder.build(&context)?;

        let mut variants = Vec::with_capacity(models.len());
        for (index, model) in models.iter().enumerate() {
            let input = CreateVariant::for_key(key, model.trim(), &prompt, index as i32);
            variants.push(self.variants.create(&input).await?);
        }

        self.assets
            .set_generation_status(key, AssetStatus::Generating)
            .await?;

        tracing::info!(
            key = %key,
            models = models.len(),
            "Fan-out variants created",
        );

        Ok(PreparedFanOut {
            key: key.clone(),
            prompt,
            variants,
            options,
        })
    }

    /// Dispatch every prepared variant concurrently.
    ///
    /// A model whose dispatch does not finish within the task timeout is
    /// left `generating`; its remote job may still call back.
    pub async fn dispatch(&self, prepared: PreparedFanOut) -> Vec<TaskOutcome<ResolveOutcome>> {
        let tasks: Vec<_> = prepared
            .variants
            .iter()
            .map(|variant| {
                let mut request = self
                    .request_for(&prepared.prompt, variant)
                    .with_reference_images(prepared.options.reference_images.clone());
                if let Some(ratio) = &prepared.options.aspect_ratio {
                    request = request.with_aspect_ratio(ratio);
                }
                async move { self.execute(variant, &request).await }
            })
            .collect();

        let options = BatchOptions {
            max_concurrent: tasks.len(),
            per_task_timeout: Some(self.task_timeout),
            cooldown: Duration::ZERO,
        };
        let outcomes = run_batched(tasks, &options, None).await;

        let mut ready = 0;
        let mut failed = 0;
        let mut pending = 0;
        for (variant, outcome) in prepared.variants.iter().zip(&outcomes) {
            match outcome {
                TaskOutcome::Completed(ResolveOutcome::Ready(_)) => ready += 1,
                TaskOutcome::Completed(ResolveOutcome::Failed(_)) => failed += 1,
                TaskOutcome::Completed(_) => pending += 1,
                TaskOutcome::TimedOut => {
                    pending += 1;
                    tracing::warn!(
                        variant_id = variant.id,
                        model = %variant.model,
                        "Dispatch timed out locally, awaiting callback",
                    );
                }
                TaskOutcome::Failed(error) => {
                    pending += 1;
                    tracing::error!(
                        variant_id = variant.id,
                        model = %variant.model,
                        error = %error,
                        "Dispatch task failed",
                    );
                }
            }
        }
        tracing::info!(
            key = %prepared.key,
            ready,
            failed,
            pending,
            "Fan-out dispatch finished",
        );

        outcomes
    }

    /// Base request for `variant`, carrying the callback URL.
    pub(crate) fn request_for(&self, prompt: &str, variant: &Variant) -> GenerationRequest {
        GenerationRequest::new(prompt, &variant.model, variant.id)
            .with_callback_url(self.callback_url.clone())
    }

    /// [`Self::execute`] bounded by the fan-out task timeout.
    pub(crate) async fn execute_bounded(
        &self,
        variant: &Variant,
        request: &GenerationRequest,
    ) -> TaskOutcome<ResolveOutcome> {
        let options = BatchOptions {
            max_concurrent: 1,
            per_task_timeout: Some(self.task_timeout),
            cooldown: Duration::ZERO,
        };
        run_batched(vec![self.execute(variant, request)], &options, None)
            .await
            .pop()
            .unwrap_or(TaskOutcome::TimedOut)
    }

    /// Send one request and apply its immediate outcome to `variant`.
    pub(crate) async fn execute(
        &self,
        variant: &Variant,
        request: &GenerationRequest,
    ) -> PipelineResult<ResolveOutcome> {
        let outcome = self.generator.dispatch(request).await;
        if let Some(job_id) = outcome.job_id() {
            self.variants.set_job_id(variant.id, job_id).await?;
        }

        match outcome {
            DispatchOutcome::Completed { image_url, .. } => {
                self.resolver
                    .resolve_image(variant, &image_url, ResolvePath::FastPath)
                    .await
            }
            DispatchOutcome::Accepted { job_id } => {
                tracing::debug!(variant_id = variant.id, job_id = %job_id, "Dispatch accepted");
                Ok(ResolveOutcome::Pending)
            }
            DispatchOutcome::Rejected { error } => {
                self.resolver.resolve_error(variant, &error).await
            }
            DispatchOutcome::Unconfirmed { error } => {
                // Left generating: a callback matched by variant id or the
                // stuck sweep settles it.
                tracing::warn!(variant_id = variant.id, error = %error, "Dispatch unconfirmed");
                Ok(ResolveOutcome::Pending)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Webhook ingestion
    // -----------------------------------------------------------------------

    /// Apply a Generation Service callback.
    ///
    /// The variant is looked up by job id, falling back to the echoed
    /// `variant_id` when the dispatch timed out before the job id was
    /// recorded. Callbacks for variants that are no longer generating are
    /// no-ops.
    pub async fn handle_callback(
        &self,
        payload: &CallbackPayload,
    ) -> PipelineResult<ResolveOutcome> {
        payload.validate()?;
        let variant = self.find_callback_target(payload).await?;

        if let (Some(job_id), None) = (payload.job_id(), variant.job_id.as_deref()) {
            self.variants.set_job_id(variant.id, job_id).await?;
        }

        let result = payload
            .result()
            .ok_or_else(|| CoreError::Validation("Callback carries no result".to_string()))?;
        self.resolver
            .resolve(&variant, &result, ResolvePath::Webhook)
            .await
    }

    async fn find_callback_target(&self, payload: &CallbackPayload) -> PipelineResult<Variant> {
        if let Some(job_id) = payload.job_id() {
            if let Some(variant) = self.variants.find_by_job_id(job_id).await? {
                return Ok(variant);
            }
        }

        let Some(variant_id) = payload.variant_id else {
            return Err(PipelineError::validation(format!(
                "No variant found for job '{}'",
                payload.job_id().unwrap_or_default()
            )));
        };
        let variant = self
            .variants
            .find(variant_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Variant", variant_id))?;

        match (payload.job_id(), variant.job_id.as_deref()) {
            (Some(incoming), Some(recorded)) if incoming != recorded => {
                Err(PipelineError::conflict(format!(
                    "Callback job '{incoming}' does not match variant {variant_id}"
                )))
            }
            _ => Ok(variant),
        }
    }
}
