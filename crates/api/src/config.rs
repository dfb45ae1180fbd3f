use std::path::PathBuf;

use storyframe_pipeline::PipelineConfig;

/// Where persisted variant images are written.
#[derive(Debug, Clone)]
pub enum BlobConfig {
    /// S3 or an S3-compatible store, credentials from the AWS default chain.
    S3 {
        bucket_prefix: String,
        public_base_url: String,
    },
    /// Local filesystem, for development.
    Local {
        root: PathBuf,
        public_base_url: String,
    },
}

impl BlobConfig {
    /// | Env Var                 | Default                          |
    /// |-------------------------|----------------------------------|
    /// | `BLOB_BACKEND`          | `local` (`s3` or `local`)        |
    /// | `BLOB_BUCKET_PREFIX`    | `storyframe-`                    |
    /// | `BLOB_PUBLIC_BASE_URL`  | `http://localhost:3000/blobs`    |
    /// | `BLOB_LOCAL_ROOT`       | `./data/blobs`                   |
    pub fn from_env() -> Self {
        let public_base_url = std::env::var("BLOB_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000/blobs".into());

        match std::env::var("BLOB_BACKEND")
            .unwrap_or_else(|_| "local".into())
            .as_str()
        {
            "s3" => Self::S3 {
                bucket_prefix: std::env::var("BLOB_BUCKET_PREFIX")
                    .unwrap_or_else(|_| "storyframe-".into()),
                public_base_url,
            },
            "local" => Self::Local {
                root: std::env::var("BLOB_LOCAL_ROOT")
                    .unwrap_or_else(|_| "./data/blobs".into())
                    .into(),
                public_base_url,
            },
            other => panic!("BLOB_BACKEND must be 's3' or 'local', got '{other}'"),
        }
    }
}

/// Generation Service endpoint.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_url: String,
    pub api_key: Option<String>,
}

impl GenerationConfig {
    /// | Env Var               | Default                  |
    /// |-----------------------|--------------------------|
    /// | `GENERATION_API_URL`  | `http://localhost:8188`  |
    /// | `GENERATION_API_KEY`  | (none)                   |
    pub fn from_env() -> Self {
        Self {
            api_url: std::env::var("GENERATION_API_URL")
                .unwrap_or_else(|_| "http://localhost:8188".into()),
            api_key: std::env::var("GENERATION_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Upper bound on waiting for background tasks at shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Period of the global stuck-variant sweep (default: `60`).
    pub stuck_sweep_interval_secs: u64,
    pub pipeline: PipelineConfig,
    pub generation: GenerationConfig,
    pub blob: BlobConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                    |
    /// |-----------------------------|----------------------------|
    /// | `HOST`                      | `0.0.0.0`                  |
    /// | `PORT`                      | `3000`                     |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `30`                       |
    /// | `STUCK_SWEEP_INTERVAL_SECS` | `60`                       |
    ///
    /// Pipeline, Generation Service and blob settings are documented on
    /// [`PipelineConfig::from_env`], [`GenerationConfig::from_env`] and
    /// [`BlobConfig::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let stuck_sweep_interval_secs: u64 = std::env::var("STUCK_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("STUCK_SWEEP_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            stuck_sweep_interval_secs: stuck_sweep_interval_secs.max(1),
            pipeline: PipelineConfig::from_env(),
            generation: GenerationConfig::from_env(),
            blob: BlobConfig::from_env(),
        }
    }
}
