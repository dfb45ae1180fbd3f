//! Prompt construction for fan-out generation.
//!
//! The prompt is resolved once per fan-out and shared by every model.
//! With reference images the image already carries the look of the asset,
//! so a short action + composition prompt is used; without them the full
//! text description has to be embedded.

use crate::error::CoreError;

/// Maximum accepted prompt length in characters.
pub const MAX_PROMPT_LEN: usize = 4000;

/// Inputs available to a [`PromptBuilder`].
#[derive(Debug, Clone, Default)]
pub struct PromptContext<'a> {
    pub asset_name: &'a str,
    pub visual_description: Option<&'a str>,
    pub action: Option<&'a str>,
    pub composition: Option<&'a str>,
    pub style: Option<&'a str>,
    pub has_reference_images: bool,
}

/// Strategy for turning asset data into the text sent to the Generation Service.
pub trait PromptBuilder: Send + Sync {
    fn build(&self, ctx: &PromptContext<'_>) -> Result<String, CoreError>;
}

/// Short prompt with references, descriptive fallback without.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPromptBuilder;

impl PromptBuilder for StandardPromptBuilder {
    fn build(&self, ctx: &PromptContext<'_>) -> Result<String, CoreError> {
        let mut parts: Vec<String> = Vec::new();

        if ctx.has_reference_images {
            push_non_blank(&mut parts, ctx.action);
            push_non_blank(&mut parts, ctx.composition);
            if parts.is_empty() {
                parts.push(format!("{} as shown in the reference image", ctx.asset_name));
            }
        } else {
            push_non_blank(&mut parts, Some(ctx.asset_name));
            push_non_blank(&mut parts, ctx.visual_description);
            push_non_blank(&mut parts, ctx.action);
            push_non_blank(&mut parts, ctx.composition);
        }
        push_non_blank(&mut parts, ctx.style);

        let prompt = parts.join(". ");
        validate_prompt(&prompt)?;
        Ok(prompt)
    }
}

/// Caller-provided literal prompt, used as-is.
#[derive(Debug, Clone)]
pub struct FixedPrompt(pub String);

impl PromptBuilder for FixedPrompt {
    fn build(&self, _ctx: &PromptContext<'_>) -> Result<String, CoreError> {
        let prompt = self.0.trim().to_string();
        validate_prompt(&prompt)?;
        Ok(prompt)
    }
}

fn push_non_blank(parts: &mut Vec<String>, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        parts.push(v.trim_end_matches('.').to_string());
    }
}

/// Validate a prompt before it is stored on a variant row.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(CoreError::Validation(format!(
            "Prompt must not exceed {MAX_PROMPT_LEN} characters"
        )));
    }
    Ok(())
}
