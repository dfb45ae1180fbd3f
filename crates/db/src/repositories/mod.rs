//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod asset_repo;
pub mod variant_repo;

pub use asset_repo::AssetRepo;
pub use variant_repo::VariantRepo;
