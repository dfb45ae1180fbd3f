//! Status enums mapping to SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table. The lowercase name is
//! the wire representation used in JSON payloads.

use crate::error::CoreError;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Every variant, in seed order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Lowercase name used on the wire and in the lookup table.
            pub fn name(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }

            /// Parse from the lowercase name.
            pub fn from_name(name: &str) -> Result<Self, CoreError> {
                match name {
                    $( $label => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "Unknown {} '{other}'",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl TryFrom<StatusId> for $name {
            type Error = CoreError;

            fn try_from(value: StatusId) -> Result<Self, Self::Error> {
                match value {
                    $( v if v == $val => Ok($name::$variant), )+
                    other => Err(CoreError::Internal(format!(
                        "Unknown {} id {other}",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                $name::from_name(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}

define_status_enum! {
    /// Lifecycle of a single generated candidate image.
    VariantStatus {
        Generating = 1 => "generating",
        Ready = 2 => "ready",
        Failed = 3 => "failed",
        Selected = 4 => "selected",
    }
}

define_status_enum! {
    /// Generation status mirrored onto the owning asset slot.
    AssetStatus {
        Pending = 1 => "pending",
        Generating = 2 => "generating",
        Ready = 3 => "ready",
        Approved = 4 => "approved",
        Failed = 5 => "failed",
    }
}

impl VariantStatus {
    /// Only persisted, non-failed variants may become (or stay) the selection.
    pub fn is_selectable(self) -> bool {
        matches!(self, Self::Ready | Self::Selected)
    }

    /// `true` once the variant has left `generating` and will not be touched
    /// by result ingestion again.
    pub fn is_resolved(self) -> bool {
        !matches!(self, Self::Generating)
    }
}
