use std::time::Duration;

use storyframe_core::generation_model::DEFAULT_MAX_MODELS_PER_FANOUT;
use storyframe_core::stuck::{validate_threshold_minutes, StuckThresholds};
use storyframe_storage::PersistConfig;

use crate::batch::BatchOptions;

/// Path the Generation Service posts results to, relative to the public base URL.
pub const CALLBACK_PATH: &str = "/api/v1/webhooks/generation";

/// Pipeline tuning loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Local wait limit for one model's dispatch and fast-path persistence.
    pub fanout_task_timeout: Duration,
    pub max_models_per_fanout: usize,
    /// Grouping used when generating a whole project.
    pub project_batch: BatchOptions,
    pub stuck_thresholds: StuckThresholds,
    /// Absolute callback URL handed to the Generation Service. `None`
    /// disables the callback path.
    pub callback_url: Option<String>,
    pub persist: PersistConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fanout_task_timeout: Duration::from_secs(120),
            max_models_per_fanout: DEFAULT_MAX_MODELS_PER_FANOUT,
            project_batch: BatchOptions {
                max_concurrent: 1,
                per_task_timeout: Some(Duration::from_secs(600)),
                cooldown: Duration::from_millis(2000),
            },
            stuck_thresholds: StuckThresholds::default(),
            callback_url: None,
            persist: PersistConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{name} must be a valid number")),
        Err(_) => default,
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                            | Default |
    /// |------------------------------------|---------|
    /// | `FANOUT_TASK_TIMEOUT_SECS`         | `120`   |
    /// | `MAX_MODELS_PER_FANOUT`            | `8`     |
    /// | `PROJECT_BATCH_CONCURRENCY`        | `1`     |
    /// | `PROJECT_BATCH_TIMEOUT_SECS`       | `600`   |
    /// | `PROJECT_BATCH_COOLDOWN_MS`        | `2000`  |
    /// | `STUCK_THRESHOLD_MINUTES`          | `5`     |
    /// | `STUCK_THRESHOLD_OVERRIDES`        | (none)  |
    /// | `PERSIST_RETRY_INITIAL_DELAY_SECS` | `3`     |
    /// | `PUBLIC_BASE_URL`                  | (none)  |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let stuck_default: i64 = env_parse(
            "STUCK_THRESHOLD_MINUTES",
            defaults.stuck_thresholds.default_minutes,
        );
        validate_threshold_minutes(stuck_default)
            .expect("STUCK_THRESHOLD_MINUTES must be at least 1");
        let stuck_thresholds = StuckThresholds::new(stuck_default)
            .parse_overrides(&std::env::var("STUCK_THRESHOLD_OVERRIDES").unwrap_or_default())
            .expect("STUCK_THRESHOLD_OVERRIDES must be comma-separated model=minutes pairs");

        let callback_url = std::env::var("PUBLIC_BASE_URL")
            .ok()
            .map(|base| base.trim().trim_end_matches('/').to_string())
            .filter(|base| !base.is_empty())
            .map(|base| format!("{base}{CALLBACK_PATH}"));

        let persist = PersistConfig {
            retry_initial_delay: Duration::from_secs(env_parse(
                "PERSIST_RETRY_INITIAL_DELAY_SECS",
                defaults.persist.retry_initial_delay.as_secs(),
            )),
            ..defaults.persist
        };

        Self {
            fanout_task_timeout: Duration::from_secs(env_parse("FANOUT_TASK_TIMEOUT_SECS", 120)),
            max_models_per_fanout: env_parse(
                "MAX_MODELS_PER_FANOUT",
                defaults.max_models_per_fanout,
            ),
            project_batch: BatchOptions {
                max_concurrent: env_parse("PROJECT_BATCH_CONCURRENCY", 1usize).max(1),
                per_task_timeout: Some(Duration::from_secs(env_parse(
                    "PROJECT_BATCH_TIMEOUT_SECS",
                    600,
                ))),
                cooldown: Duration::from_millis(env_parse("PROJECT_BATCH_COOLDOWN_MS", 2000)),
            },
            stuck_thresholds,
            callback_url,
            persist,
        }
    }
}
