use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::{CatalogSource, ProgressFn};
use crate::storage::ContentType;

const MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024; // 64MB

/// Errors that can occur while downloading a catalog payload.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// No response, or the body stalled, within the request timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the configured payload limit
    #[error("Response too large (exceeds {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Content-type path could not be joined onto the base URL
    #[error("Invalid catalog endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Catalog source backed by an HTTP/JSON provider.
///
/// Each content type is served at `<base_url><content_type>`, e.g.
/// `https://provider.example/api/live`.
pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<SecretString>,
    request_timeout: Duration,
    max_payload: usize,
    retry_base_delay: Duration,
}

impl HttpCatalogClient {
    /// `base_url` is expected to come from `util::validate_catalog_url`.
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            api_token: None,
            request_timeout: DEFAULT_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_api_token(mut self, token: Option<SecretString>) -> Self {
        self.api_token = token;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_payload(mut self, bytes: usize) -> Self {
        self.max_payload = bytes;
        self
    }

    /// First backoff delay; later retries double it.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn endpoint(&self, content_type: ContentType) -> Result<Url, FetchError> {
        self.base_url
            .join(content_type.as_str())
            .map_err(|e| FetchError::InvalidEndpoint(e.to_string()))
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.retry_base_delay.saturating_mul(1 << retry)
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)
    }

    /// Stream the body with a size cap, reporting progress per chunk.
    async fn read_limited_bytes(
        &self,
        response: reqwest::Response,
        progress: &ProgressFn<'_>,
    ) -> Result<Vec<u8>, FetchError> {
        let expected_length = response.content_length();

        // Fast path: check Content-Length header
        if let Some(len) = expected_length {
            if len > self.max_payload as u64 {
                return Err(FetchError::ResponseTooLarge(self.max_payload));
            }
        }

        let capacity = expected_length.map_or(0, |len| len as usize);
        let mut bytes = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        progress(0, expected_length);

        loop {
            let next = tokio::time::timeout(self.request_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Timeout)?;
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(FetchError::Network)?;

            if bytes.len().saturating_add(chunk.len()) > self.max_payload {
                return Err(FetchError::ResponseTooLarge(self.max_payload));
            }
            bytes.extend_from_slice(&chunk);
            progress(bytes.len() as u64, expected_length);
        }

        if let Some(expected) = expected_length {
            if (bytes.len() as u64) < expected {
                return Err(FetchError::IncompleteResponse {
                    expected,
                    received: bytes.len(),
                });
            }
        }

        Ok(bytes)
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogClient {
    async fn fetch(
        &self,
        content_type: ContentType,
        progress: &ProgressFn<'_>,
    ) -> Result<Vec<u8>, FetchError> {
        let url = self.endpoint(content_type)?;
        let mut retry_count = 0;

        loop {
            let response = self.send(&url).await?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    content_type = %content_type,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    content_type = %content_type,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match self.read_limited_bytes(response, progress).await {
                Ok(bytes) => {
                    tracing::debug!(
                        content_type = %content_type,
                        bytes = bytes.len(),
                        "Catalog payload downloaded"
                    );
                    return Ok(bytes);
                }
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < MAX_RETRIES =>
                {
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        content_type = %content_type,
                        expected,
                        received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
