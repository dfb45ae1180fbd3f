//! Domain types, constants and validation for the variant pipeline.
//!
//! Pure code only: no database, network or filesystem access. Shared by
//! every other crate in the workspace.

pub mod asset;
pub mod error;
pub mod generation_model;
pub mod prompt;
pub mod status;
pub mod storage_key;
pub mod stuck;
pub mod types;
