//! Wire types exchanged with the Generation Service.

use serde::{Deserialize, Serialize};
use storyframe_core::error::CoreError;
use storyframe_core::generation_model::{quality_for_model, QualityTier};
use storyframe_core::types::DbId;

/// Aspect ratio used when the caller does not ask for one.
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

// ---------------------------------------------------------------------------
// Outbound request
// ---------------------------------------------------------------------------

/// Body of `POST {GENERATION_API_URL}/generate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub aspect_ratio: String,
    pub quality: QualityTier,
    /// Single image-to-image source (refinement).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_url: Option<String>,
    /// Multi-reference conditioning images.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_images: Vec<String>,
    /// Echoed back on the callback so a timed-out dispatch can still be
    /// matched to its variant.
    pub variant_id: DbId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
}

impl GenerationRequest {
    /// Build a text-to-image request; the quality tier follows the model name.
    pub fn new(prompt: impl Into<String>, model: impl Into<String>, variant_id: DbId) -> Self {
        let model = model.into();
        Self {
            prompt: prompt.into(),
            quality: quality_for_model(&model),
            model,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            source_image_url: None,
            reference_images: Vec::new(),
            variant_id,
            callback_url: None,
        }
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = aspect_ratio.into();
        self
    }

    pub fn with_source_image(mut self, url: impl Into<String>) -> Self {
        self.source_image_url = Some(url.into());
        self
    }

    pub fn with_reference_images(mut self, urls: Vec<String>) -> Self {
        self.reference_images = urls;
        self
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }
}

// ---------------------------------------------------------------------------
// Dispatch response
// ---------------------------------------------------------------------------

/// Raw JSON returned by the Generation Service on dispatch.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// What a dispatch produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The image came back synchronously (fast path).
    Completed {
        job_id: Option<String>,
        image_url: String,
    },
    /// A job was queued; the image will arrive on the callback.
    Accepted { job_id: String },
    /// The dispatch itself failed. No job exists and no callback will come.
    Rejected { error: String },
    /// The request was sent but its answer was lost (timeout, reset,
    /// unreadable body). A job may exist and call back later.
    Unconfirmed { error: String },
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl From<DispatchResponse> for DispatchOutcome {
    fn from(resp: DispatchResponse) -> Self {
        if let Some(error) = non_blank(resp.error) {
            return DispatchOutcome::Rejected { error };
        }
        let job_id = non_blank(resp.task_id);
        match (non_blank(resp.image_url), job_id) {
            (Some(image_url), job_id) => DispatchOutcome::Completed { job_id, image_url },
            (None, Some(job_id)) => DispatchOutcome::Accepted { job_id },
            (None, None) => DispatchOutcome::Rejected {
                error: "Generation service returned neither a task id nor an image".to_string(),
            },
        }
    }
}

impl DispatchOutcome {
    /// Job handle to record on the variant, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Completed { job_id, .. } => job_id.as_deref(),
            DispatchOutcome::Accepted { job_id } => Some(job_id),
            DispatchOutcome::Rejected { .. } | DispatchOutcome::Unconfirmed { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound callback
// ---------------------------------------------------------------------------

/// Body the Generation Service posts to the callback URL.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub variant_id: Option<DbId>,
    #[serde(default, rename = "taskId", alias = "task_id")]
    pub task_id: Option<String>,
    #[serde(default, rename = "imageUrl", alias = "image_url")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The delivered result of a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Image(String),
    Error(String),
}

impl CallbackPayload {
    /// Reject payloads that can be matched to no variant or carry no result.
    pub fn validate(&self) -> Result<(), CoreError> {
        if non_blank(self.task_id.clone()).is_none() && self.variant_id.is_none() {
            return Err(CoreError::Validation(
                "Callback must carry a taskId or variant_id".to_string(),
            ));
        }
        if non_blank(self.image_url.clone()).is_none() && non_blank(self.error.clone()).is_none() {
            return Err(CoreError::Validation(
                "Callback must carry an imageUrl or an error".to_string(),
            ));
        }
        Ok(())
    }

    /// An upstream error wins over an image URL if both are present.
    pub fn result(&self) -> Option<CallbackResult> {
        if let Some(error) = non_blank(self.error.clone()) {
            return Some(CallbackResult::Error(error));
        }
        non_blank(self.image_url.clone()).map(CallbackResult::Image)
    }

    pub fn job_id(&self) -> Option<&str> {
        self.task_id.as_deref().filter(|s| !s.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
