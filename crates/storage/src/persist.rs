//! Blob persistence adapter.
//!
//! Moves a transient image URL into durable storage. Every failure is
//! soft: [`BlobPersister::persist`] and [`BlobPersister::persist_with_retry`]
//! log and return `None`, and the caller decides whether the variant stays
//! `generating` or is marked failed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use storyframe_core::asset::AssetKey;
use storyframe_core::storage_key::{
    content_type_for_extension, extension_for_content_type, variant_object_path,
};
use storyframe_core::types::DbId;
use uuid::Uuid;

use crate::blob::{BlobStore, BlobStoreError, StoredBlob};
use crate::fetch::{FetchError, ImageFetcher};

/// Download timeout for a single attempt.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Payloads smaller than this are treated as corrupt.
pub const DEFAULT_MIN_BYTES: usize = 1000;

/// Delay before the first retrying attempt, letting the upstream CDN settle.
pub const DEFAULT_RETRY_INITIAL_DELAY: Duration = Duration::from_secs(3);

/// Total attempts made by [`BlobPersister::persist_with_retry`].
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Backoff after the first failed attempt; doubles after each further one.
pub const DEFAULT_RETRY_BACKOFF_BASE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for [`BlobPersister`].
#[derive(Debug, Clone)]
pub struct PersistConfig {
    pub download_timeout: Duration,
    pub min_bytes: usize,
    pub retry_initial_delay: Duration,
    pub retry_attempts: u32,
    pub retry_backoff_base: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            min_bytes: DEFAULT_MIN_BYTES,
            retry_initial_delay: DEFAULT_RETRY_INITIAL_DELAY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_base: DEFAULT_RETRY_BACKOFF_BASE,
        }
    }
}

impl PersistConfig {
    /// Backoff to wait after failed attempt number `attempt` (zero-based).
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff_base * 2u32.saturating_pow(attempt)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Where a persisted image should land.
#[derive(Debug, Clone)]
pub struct BlobDestination {
    pub key: AssetKey,
    pub variant_id: DbId,
}

#[derive(Debug, thiserror::Error)]
enum PersistError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Payload of {0} bytes is below the minimum size")]
    Undersized(usize),

    #[error(transparent)]
    Upload(#[from] BlobStoreError),
}

impl PersistError {
    fn is_retryable(&self) -> bool {
        match self {
            PersistError::Fetch(e) => e.is_server_error(),
            PersistError::Undersized(_) => true,
            PersistError::Upload(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// BlobPersister
// ---------------------------------------------------------------------------

/// Downloads transient results and uploads them to the blob store.
pub struct BlobPersister {
    fetcher: Arc<dyn ImageFetcher>,
    store: Arc<dyn BlobStore>,
    config: PersistConfig,
}

impl BlobPersister {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        store: Arc<dyn BlobStore>,
        config: PersistConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            config,
        }
    }

    /// Single-shot persistence used right after a synchronous dispatch.
    pub async fn persist(&self, transient_url: &str, dest: &BlobDestination) -> Option<StoredBlob> {
        match self.try_persist(transient_url, dest).await {
            Ok(blob) => Some(blob),
            Err(e) => {
                tracing::warn!(
                    variant_id = dest.variant_id,
                    url = transient_url,
                    error = %e,
                    "Image persistence failed",
                );
                None
            }
        }
    }

    /// Slower persistence for the callback path: waits the initial delay,
    /// then retries 5xx responses and undersized payloads with exponential
    /// backoff.
    pub async fn persist_with_retry(
        &self,
        transient_url: &str,
        dest: &BlobDestination,
    ) -> Option<StoredBlob> {
        tokio::time::sleep(self.config.retry_initial_delay).await;

        let attempts = self.config.retry_attempts.max(1);
        for attempt in 0..attempts {
            match self.try_persist(transient_url, dest).await {
                Ok(blob) => return Some(blob),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        variant_id = dest.variant_id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Image persistence attempt failed, retrying",
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        attempt = attempt + 1,
                        variant_id = dest.variant_id,
                        url = transient_url,
                        error = %e,
                        "Image persistence failed, giving up",
                    );
                    return None;
                }
            }
        }
        None
    }

    /// Best-effort removal of a blob that no row references.
    pub async fn discard(&self, key: &AssetKey, path: &str) {
        if path.is_empty() {
            return;
        }
        if let Err(e) = self.store.delete(key.asset_type.bucket(), path).await {
            tracing::warn!(path, error = %e, "Failed to delete orphaned blob");
        }
    }

    async fn try_persist(
        &self,
        transient_url: &str,
        dest: &BlobDestination,
    ) -> Result<StoredBlob, PersistError> {
        let image = self
            .fetcher
            .fetch(transient_url, self.config.download_timeout)
            .await?;
        if image.bytes.len() < self.config.min_bytes {
            return Err(PersistError::Undersized(image.bytes.len()));
        }

        let extension = extension_for_content_type(image.content_type.as_deref());
        let token = Uuid::new_v4().simple().to_string();
        let path = variant_object_path(
            &dest.key,
            dest.variant_id,
            Utc::now(),
            &token[..8],
            extension,
        );
        let blob = self
            .store
            .upload(
                dest.key.asset_type.bucket(),
                &path,
                image.bytes,
                content_type_for_extension(extension),
            )
            .await?;

        tracing::debug!(variant_id = dest.variant_id, path = %blob.path, "Persisted image");
        Ok(blob)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
