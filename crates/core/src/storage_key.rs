//! Deterministic object keys for persisted variant images.
//!
//! Layout inside the asset type's bucket:
//!
//! ```text
//! {asset_id}/{sub_type}/{variant_id}-{unix_millis}-{token}.{ext}
//! {asset_id}/{variant_id}-{unix_millis}-{token}.{ext}          (no sub-type)
//! ```
//!
//! The variant id makes keys unique per variant. The per-write token keeps
//! two writers racing on one variant from sharing an object, so the loser
//! can delete its own upload without touching the winner's.

use crate::asset::AssetKey;
use crate::types::{DbId, Timestamp};

/// Extension used when the content type is missing or unrecognised.
pub const DEFAULT_EXTENSION: &str = "png";

/// Build the object path for a variant image.
pub fn variant_object_path(
    key: &AssetKey,
    variant_id: DbId,
    at: Timestamp,
    token: &str,
    extension: &str,
) -> String {
    let millis = at.timestamp_millis();
    match key.sub_type() {
        Some(sub) => format!(
            "{}/{sub}/{variant_id}-{millis}-{token}.{extension}",
            key.asset_id
        ),
        None => format!("{}/{variant_id}-{millis}-{token}.{extension}", key.asset_id),
    }
}

/// Map a MIME content type to a file extension.
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    match essence.as_deref() {
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        Some("image/png") => "png",
        _ => DEFAULT_EXTENSION,
    }
}

/// Content type recorded on upload for a given extension.
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}
