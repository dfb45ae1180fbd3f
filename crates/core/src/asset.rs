//! Polymorphic asset reference shared by every variant.
//!
//! Characters, locations, props and scenes all compete for images through
//! the same variant shape. The [`AssetKey`] names one competition slot:
//! `(asset_type, asset_id, sub_type)`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

/// Maximum length of a sub-type discriminator.
const MAX_SUB_TYPE_LEN: usize = 64;

// ---------------------------------------------------------------------------
// AssetType
// ---------------------------------------------------------------------------

/// The kind of entity that owns an approved image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Character,
    Location,
    Prop,
    Scene,
}

impl AssetType {
    pub const ALL: &'static [AssetType] = &[
        AssetType::Character,
        AssetType::Location,
        AssetType::Prop,
        AssetType::Scene,
    ];

    /// Database/wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Prop => "prop",
            Self::Scene => "scene",
        }
    }

    /// Blob store bucket holding this kind's images.
    pub fn bucket(self) -> &'static str {
        match self {
            Self::Character => "characters",
            Self::Location => "locations",
            Self::Prop => "props",
            Self::Scene => "scenes",
        }
    }

    /// Parse from the database `asset_type` column or a URL segment.
    ///
    /// Accepts both the singular name and the plural bucket form so that
    /// `/assets/characters/..` and `/assets/character/..` both resolve.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == name || t.bucket() == name)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown asset type '{name}'. Must be one of: character, location, prop, scene"
                ))
            })
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for AssetType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value)
    }
}

// ---------------------------------------------------------------------------
// AssetKey
// ---------------------------------------------------------------------------

/// Identifies the slot a variant competes for.
///
/// At most one variant per key may be selected at any committed state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    pub asset_type: AssetType,
    pub asset_id: DbId,
    pub sub_type: Option<String>,
}

impl AssetKey {
    pub fn new(asset_type: AssetType, asset_id: DbId, sub_type: Option<String>) -> Self {
        Self {
            asset_type,
            asset_id,
            sub_type: normalize_sub_type(sub_type),
        }
    }

    /// Key for an asset kind with no sub-type slots (locations, scenes).
    pub fn whole(asset_type: AssetType, asset_id: DbId) -> Self {
        Self::new(asset_type, asset_id, None)
    }

    pub fn sub_type(&self) -> Option<&str> {
        self.sub_type.as_deref()
    }
}

impl std::fmt::Display for AssetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sub_type {
            Some(sub) => write!(f, "{}:{}:{}", self.asset_type, self.asset_id, sub),
            None => write!(f, "{}:{}", self.asset_type, self.asset_id),
        }
    }
}

/// Blank sub-types are treated as absent so `""` and `None` name one slot.
pub fn normalize_sub_type(sub_type: Option<String>) -> Option<String> {
    sub_type
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Validate a caller-supplied sub-type discriminator.
pub fn validate_sub_type(sub_type: Option<&str>) -> Result<(), CoreError> {
    let Some(sub) = sub_type else {
        return Ok(());
    };
    if sub.len() > MAX_SUB_TYPE_LEN {
        return Err(CoreError::Validation(format!(
            "sub_type must not exceed {MAX_SUB_TYPE_LEN} characters"
        )));
    }
    if !sub
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(
            "sub_type may only contain ASCII alphanumeric, hyphen, or underscore characters"
                .to_string(),
        ));
    }
    Ok(())
}
