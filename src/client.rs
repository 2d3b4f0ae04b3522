//! Inference client
//!
//! This module dispatches inference requests over the network boundary with
//! timeout, bounded exponential backoff, and optional API-key auth.
//!
//! Retry policy:
//! - 4xx except 429: permanent rejection, surfaced immediately
//! - 429 / 5xx / network timeout: retried with exponential backoff, honoring
//!   a server-supplied `retry_after_ms` hint when present
//! - Retry budget exhausted: surfaced as `Unavailable` so the caller can fall
//!   back to a last-known prediction
//!
//! The configured timeout bounds every attempt; a slow or flapping model
//! never holds the caller past it. Dropping the returned future (e.g. on app
//! backgrounding) aborts the in-flight call without touching local state.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::error::InferenceError;
use crate::types::{InferenceRequest, InferenceResponse};

/// Default per-attempt timeout (ms).
pub const DEFAULT_TIMEOUT_MS: u64 = 8_000;

/// Default retry attempts after the initial call.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default base delay for the backoff schedule (ms).
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Inference endpoint configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL of the `POST /v1/infer` endpoint
    pub endpoint: String,
    /// API key sent as `x-api-key`; header omitted entirely when `None`
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// Error body of the wire contract.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

impl ErrorBody {
    fn describe(&self, status: StatusCode) -> String {
        format!(
            "{} ({}): {} [request {}]",
            self.error.as_deref().unwrap_or("http_error"),
            self.code.unwrap_or_else(|| status.as_u16() as i64),
            self.message.as_deref().unwrap_or("no message"),
            self.request_id.as_deref().unwrap_or("unknown"),
        )
    }
}

/// Client for the remote (or on-device) mood model
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl InferenceClient {
    pub fn new(config: ClientConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| InferenceError::Unavailable(format!("failed to build client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Dispatch a request, applying the retry policy.
    ///
    /// Local validation has already happened by construction of the request;
    /// a malformed request therefore never consumes retry budget here.
    pub async fn infer(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        let mut delays = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        loop {
            match self.infer_once(request).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    let hint = match &e {
                        InferenceError::RateLimited {
                            retry_after_ms: Some(ms),
                            ..
                        } => Some(Duration::from_millis(*ms)),
                        _ => None,
                    };

                    match delays.next() {
                        Some(backoff) => {
                            let wait = hint.unwrap_or(backoff);
                            tracing::warn!(
                                model = request.model(),
                                features_hash = request.features_hash(),
                                error = %e,
                                wait_ms = wait.as_millis() as u64,
                                "inference attempt failed, backing off"
                            );
                            tokio::time::sleep(wait).await;
                        }
                        None => {
                            tracing::error!(
                                model = request.model(),
                                features_hash = request.features_hash(),
                                attempts = self.config.max_retries + 1,
                                error = %e,
                                "inference retry budget exhausted"
                            );
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn infer_once(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        // Fresh id per attempt so server-side logs distinguish retries
        let attempt_id = uuid::Uuid::new_v4().to_string();
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("x-request-id", &attempt_id)
            .json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Unavailable(format!(
                    "request timed out after {} ms (model {}, features {})",
                    self.config.timeout_ms,
                    request.model(),
                    request.features_hash()
                ))
            } else {
                InferenceError::Unavailable(format!(
                    "network error (model {}): {e}",
                    request.model()
                ))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<InferenceResponse>().await.map_err(|e| {
                InferenceError::Validation(format!(
                    "malformed response body (model {}): {e}",
                    request.model()
                ))
            });
        }

        let body_text = response.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&body_text).unwrap_or(ErrorBody {
            error: None,
            message: if body_text.is_empty() {
                None
            } else {
                Some(body_text.clone())
            },
            code: None,
            request_id: None,
            retry_after_ms: None,
        });

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(InferenceError::Auth(body.describe(status)))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(InferenceError::RateLimited {
                message: body.describe(status),
                retry_after_ms: body.retry_after_ms,
            }),
            s if s.is_client_error() => Err(InferenceError::Validation(body.describe(status))),
            s => Err(InferenceError::Unavailable(format!(
                "server fault {}: {}",
                s.as_u16(),
                body.describe(status)
            ))),
        }
    }
}
