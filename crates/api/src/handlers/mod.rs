pub mod asset_variant;
pub mod project;
pub mod variant;
pub mod webhook;
