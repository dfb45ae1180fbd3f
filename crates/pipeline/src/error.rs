use storyframe_core::error::CoreError;

use crate::store::StoreError;

/// Errors surfaced by pipeline operations.
///
/// Domain failures (validation, not found, conflict) arrive as
/// [`CoreError`]; anything from the persistence layer is a
/// [`StoreError`] and aborts the operation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn not_found(entity: &'static str, id: storyframe_core::types::DbId) -> Self {
        PipelineError::Core(CoreError::NotFound { entity, id })
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PipelineError::Core(CoreError::Validation(msg.into()))
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        PipelineError::Core(CoreError::Conflict(msg.into()))
    }
}
