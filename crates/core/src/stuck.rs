//! Stuck-generation thresholds and messages.
//!
//! A variant left in `generating` past its threshold is considered stuck:
//! no fast-path result and no callback arrived. Slow models get their own
//! threshold so they are not reaped while still legitimately running.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Default age after which a `generating` variant is considered stuck.
pub const DEFAULT_STUCK_THRESHOLD_MINUTES: i64 = 5;

/// Prefix of the error message written by the sweep. Lets the UI tell a
/// timeout apart from a genuine upstream failure.
pub const STUCK_ERROR_PREFIX: &str = "Generation timed out";

/// Per-model stuck thresholds with a global default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckThresholds {
    pub default_minutes: i64,
    pub per_model: HashMap<String, i64>,
}

impl Default for StuckThresholds {
    fn default() -> Self {
        Self {
            default_minutes: DEFAULT_STUCK_THRESHOLD_MINUTES,
            per_model: HashMap::new(),
        }
    }
}

impl StuckThresholds {
    pub fn new(default_minutes: i64) -> Self {
        Self {
            default_minutes,
            per_model: HashMap::new(),
        }
    }

    pub fn with_override(mut self, model: impl Into<String>, minutes: i64) -> Self {
        self.per_model.insert(model.into(), minutes);
        self
    }

    /// Threshold in minutes for `model`.
    pub fn minutes_for(&self, model: &str) -> i64 {
        self.per_model
            .get(model)
            .copied()
            .unwrap_or(self.default_minutes)
    }

    /// Smallest configured threshold. Anything younger than this cannot be
    /// stuck under any model's rule.
    pub fn min_minutes(&self) -> i64 {
        self.per_model
            .values()
            .copied()
            .chain(std::iter::once(self.default_minutes))
            .min()
            .unwrap_or(self.default_minutes)
    }

    /// Parse `model=minutes` pairs separated by commas, e.g.
    /// `"veo-3=20,kling-video=15"`.
    pub fn parse_overrides(mut self, raw: &str) -> Result<Self, CoreError> {
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (model, minutes) = pair.split_once('=').ok_or_else(|| {
                CoreError::Validation(format!("Invalid stuck threshold override '{pair}'"))
            })?;
            let minutes: i64 = minutes.trim().parse().map_err(|_| {
                CoreError::Validation(format!("Invalid minutes in override '{pair}'"))
            })?;
            validate_threshold_minutes(minutes)?;
            self.per_model.insert(model.trim().to_string(), minutes);
        }
        Ok(self)
    }
}

/// Thresholds must be at least one minute.
pub fn validate_threshold_minutes(minutes: i64) -> Result<(), CoreError> {
    if minutes < 1 {
        return Err(CoreError::Validation(
            "Stuck threshold must be at least 1 minute".to_string(),
        ));
    }
    Ok(())
}

/// Creation-time cutoff: variants created before this are older than
/// `minutes` at `now`.
pub fn cutoff(now: Timestamp, minutes: i64) -> Timestamp {
    now - chrono::Duration::minutes(minutes)
}

/// Error message stored on a swept variant.
pub fn stuck_error_message(minutes: i64) -> String {
    format!("{STUCK_ERROR_PREFIX}: no result received within {minutes} minutes")
}

/// Whether a stored error message was written by the sweep.
pub fn is_stuck_error(message: &str) -> bool {
    message.starts_with(STUCK_ERROR_PREFIX)
}
