//! REST client for the Generation Service.
//!
//! Wraps `POST /generate` using [`reqwest`]. The [`GenerationClient`] seam
//! folds every failure into a [`DispatchOutcome`]: failures that prove no
//! job was created become `Rejected`, failures after the request left
//! become `Unconfirmed`.

use async_trait::async_trait;

use crate::messages::{DispatchOutcome, DispatchResponse, GenerationRequest};

/// Sends generation requests to the external service.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Dispatch one request. Never mutates local state.
    async fn dispatch(&self, request: &GenerationRequest) -> DispatchOutcome;
}

/// Errors from the Generation Service REST layer.
#[derive(Debug, thiserror::Error)]
pub enum GenerationApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl GenerationApiError {
    /// Whether the request may have reached the service before failing.
    ///
    /// Connect and build errors happen before anything is sent, and a
    /// non-2xx status is an explicit refusal. Anything else failed while
    /// waiting for or reading the answer.
    pub fn may_have_reached_service(&self) -> bool {
        match self {
            GenerationApiError::Request(e) => !(e.is_connect() || e.is_builder()),
            GenerationApiError::ApiError { .. } => false,
        }
    }
}

/// HTTP client for the Generation Service.
pub struct HttpGenerationClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpGenerationClient {
    /// * `api_url` - Base HTTP URL, e.g. `https://gen.internal`.
    pub fn new(api_url: String, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, api_key)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Send `POST /generate` and return the raw response body.
    pub async fn submit(
        &self,
        request: &GenerationRequest,
    ) -> Result<DispatchResponse, GenerationApiError> {
        let mut builder = self
            .client
            .post(format!("{}/generate", self.api_url))
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;
        Self::parse_response(response).await
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, GenerationApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GenerationApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    async fn dispatch(&self, request: &GenerationRequest) -> DispatchOutcome {
        match self.submit(request).await {
            Ok(response) => DispatchOutcome::from(response),
            Err(e) if e.may_have_reached_service() => {
                tracing::warn!(
                    variant_id = request.variant_id,
                    model = %request.model,
                    error = %e,
                    "Generation dispatch unconfirmed",
                );
                DispatchOutcome::Unconfirmed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(
                    variant_id = request.variant_id,
                    model = %request.model,
                    error = %e,
                    "Generation dispatch failed",
                );
                DispatchOutcome::Rejected {
                    error: e.to_string(),
                }
            }
        }
    }
}
