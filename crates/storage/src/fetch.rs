//! Downloading transient image URLs returned by the Generation Service.

use std::time::Duration;

use async_trait::async_trait;

/// A downloaded image payload.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    /// Value of the response `Content-Type` header, if any.
    pub content_type: Option<String>,
}

/// Why a download failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a non-success status.
    #[error("Image download returned HTTP {0}")]
    Status(u16),

    /// No complete response within the timeout.
    #[error("Image download timed out")]
    Timeout,

    /// Connection or body-read failure.
    #[error("Image download failed: {0}")]
    Transport(String),
}

impl FetchError {
    /// Server-side failures that may succeed on a later attempt.
    pub fn is_server_error(&self) -> bool {
        matches!(self, FetchError::Status(code) if *code >= 500)
    }
}

/// Downloads the bytes behind a URL.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedImage, FetchError>;
}

/// [`ImageFetcher`] over a shared `reqwest::Client`.
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpImageFetcher {
    fn default() -> Self {
        Self::new()
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<FetchedImage, FetchError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(classify)?;

        Ok(FetchedImage {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}
