//! Model-name conventions: quality tiers, image-to-image forms, validation.
//!
//! Model identifiers are opaque strings owned by the Generation Service.
//! Everything here is derived deterministically from the identifier.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Identifier fragment of the model family billed at the basic tier.
pub const BASIC_TIER_MARKER: &str = "seedream";

/// Identifier fragments of the cheaper second-tier model builds.
pub const LOW_TIER_MARKERS: &[&str] = &["lite", "turbo", "schnell"];

/// Suffix the Generation Service uses for image-to-image model builds.
pub const IMAGE_TO_IMAGE_SUFFIX: &str = "-edit";

/// Fragments that already mark a model as image-to-image.
const IMAGE_TO_IMAGE_MARKERS: &[&str] = &["-edit", "img2img", "i2i"];

/// Default upper bound on models in a single fan-out.
pub const DEFAULT_MAX_MODELS_PER_FANOUT: usize = 8;

/// Maximum length of a model identifier.
const MAX_MODEL_LEN: usize = 128;

// ---------------------------------------------------------------------------
// Quality tier
// ---------------------------------------------------------------------------

/// Quality tier sent alongside every generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Basic,
    Low,
    Medium,
}

impl QualityTier {
    pub fn name(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Low => "low",
            Self::Medium => "medium",
        }
    }
}

/// Derive the quality tier from a model identifier.
///
/// - contains `seedream` -> `Basic`
/// - contains a second-tier marker -> `Low`
/// - anything else -> `Medium`
pub fn quality_for_model(model: &str) -> QualityTier {
    let model = model.to_ascii_lowercase();
    if model.contains(BASIC_TIER_MARKER) {
        QualityTier::Basic
    } else if LOW_TIER_MARKERS.iter().any(|m| model.contains(m)) {
        QualityTier::Low
    } else {
        QualityTier::Medium
    }
}

// ---------------------------------------------------------------------------
// Image-to-image
// ---------------------------------------------------------------------------

/// Whether a model identifier already names an image-to-image build.
pub fn is_image_to_image(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    IMAGE_TO_IMAGE_MARKERS.iter().any(|m| model.contains(m))
}

/// Force a model identifier into its image-to-image form.
///
/// `nano-banana` -> `nano-banana-edit`; already-edit models pass through.
pub fn image_to_image_model(model: &str) -> String {
    let model = model.trim();
    if is_image_to_image(model) {
        model.to_string()
    } else {
        format!("{model}{IMAGE_TO_IMAGE_SUFFIX}")
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a single model identifier.
pub fn validate_model(model: &str) -> Result<(), CoreError> {
    if model.trim().is_empty() {
        return Err(CoreError::Validation("Model must not be empty".to_string()));
    }
    if model.len() > MAX_MODEL_LEN {
        return Err(CoreError::Validation(format!(
            "Model identifier must not exceed {MAX_MODEL_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate the model list of a fan-out request.
///
/// Duplicates are allowed: generating twice with one model is a
/// legitimate way to get two candidates.
pub fn validate_models(models: &[String], max_models: usize) -> Result<(), CoreError> {
    if models.is_empty() {
        return Err(CoreError::Validation(
            "At least one model is required".to_string(),
        ));
    }
    if models.len() > max_models {
        return Err(CoreError::Validation(format!(
            "At most {max_models} models may be requested at once"
        )));
    }
    for (i, model) in models.iter().enumerate() {
        validate_model(model)
            .map_err(|_| CoreError::Validation(format!("Model at index {i} is invalid")))?;
    }
    Ok(())
}
