//! Error types for the moodsense pipeline

use thiserror::Error;

/// Errors that can occur anywhere in the inference pipeline.
///
/// Only `RateLimited` and `Unavailable` are retryable; everything else is
/// surfaced to the caller immediately. Messages carry request ids, feature
/// hashes, and model identity where available, never raw health samples.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Malformed or out-of-range input or response. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// 401/403 from the model endpoint. Never retried.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// 429 from the model endpoint. Retried with backoff, honoring the
    /// server-supplied hint when present.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// Network failure, timeout, or 5xx. Retried with bounded backoff, then
    /// surfaced as a soft failure (callers may fall back to the last-known
    /// prediction).
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Feature version or scaler mismatch between client and model. Fatal,
    /// never retried.
    #[error("incompatible feature/scaler version: {0}")]
    IncompatibleVersion(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl InferenceError {
    /// Whether the retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InferenceError::RateLimited { .. } | InferenceError::Unavailable(_)
        )
    }
}
