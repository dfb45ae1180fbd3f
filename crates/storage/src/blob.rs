//! Blob Store seam and its backends.
//!
//! Buckets are partitioned by asset type (`characters`, `locations`,
//! `props`, `scenes`). Object paths are produced by
//! [`storyframe_core::storage_key`].

use std::path::PathBuf;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Location of an uploaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Permanent public URL.
    pub url: String,
    /// Object path inside the bucket.
    pub path: String,
}

/// Errors from a blob store backend.
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    /// Local filesystem I/O failed.
    #[error("Blob I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The remote object store rejected or failed the request.
    #[error("Object store error: {0}")]
    Backend(String),

    /// Path would escape the bucket.
    #[error("Invalid object path '{0}'")]
    InvalidPath(String),
}

/// Durable binary storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `bucket/path`, returning its permanent location.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError>;

    /// Remove `bucket/path`. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, path: &str) -> Result<(), BlobStoreError>;
}

fn public_url(base_url: &str, bucket: &str, path: &str) -> String {
    format!("{}/{bucket}/{path}", base_url.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// Stores objects under `{root}/{bucket}/{path}`. Meant for local
/// development where a static file server exposes `root` at `public_base_url`.
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, BlobStoreError> {
        let escapes = |s: &str| s.split('/').any(|seg| seg == ".." || seg.is_empty());
        if escapes(bucket) || escapes(path) || path.starts_with('/') {
            return Err(BlobStoreError::InvalidPath(format!("{bucket}/{path}")));
        }
        Ok(self.root.join(bucket).join(path))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        let target = self.object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        Ok(StoredBlob {
            url: public_url(&self.public_base_url, bucket, path),
            path: path.to_string(),
        })
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), BlobStoreError> {
        let target = self.object_path(bucket, path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// S3 (or S3-compatible) object store. Bucket names are
/// `{bucket_prefix}{bucket}`, e.g. `storyframe-characters`.
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket_prefix: String,
    public_base_url: String,
}

impl S3BlobStore {
    pub fn new(
        client: aws_sdk_s3::Client,
        bucket_prefix: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket_prefix: bucket_prefix.into(),
            public_base_url: public_base_url.into(),
        }
    }

    /// Build a client from the default AWS credential/region chain.
    pub async fn from_env(
        bucket_prefix: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(
            aws_sdk_s3::Client::new(&config),
            bucket_prefix,
            public_base_url,
        )
    }

    fn bucket_name(&self, bucket: &str) -> String {
        format!("{}{bucket}", self.bucket_prefix)
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        let bucket_name = self.bucket_name(bucket);
        self.client
            .put_object()
            .bucket(&bucket_name)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                BlobStoreError::Backend(aws_sdk_s3::error::DisplayErrorContext(e).to_string())
            })?;

        Ok(StoredBlob {
            url: public_url(&self.public_base_url, &bucket_name, path),
            path: path.to_string(),
        })
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), BlobStoreError> {
        self.client
            .delete_object()
            .bucket(self.bucket_name(bucket))
            .key(path)
            .send()
            .await
            .map_err(|e| {
                BlobStoreError::Backend(aws_sdk_s3::error::DisplayErrorContext(e).to_string())
            })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
