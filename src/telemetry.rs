//! Pipeline telemetry
//!
//! Fire-and-forget hooks around the inference exchange: a request either
//! completes into an enqueued prediction or is reported as failed, whether
//! the fault was transport-level or an uninterpretable response. Sinks must
//! never block or fail the pipeline; the default sink writes structured log
//! events.

use crate::error::InferenceError;

/// Observer for inference request lifecycle events.
pub trait TelemetrySink: Send + Sync {
    fn request_started(&self, model: &str, features_hash: &str);

    fn request_completed(&self, model: &str, request_id: &str, elapsed_ms: u64);

    fn request_failed(&self, model: &str, features_hash: &str, error: &InferenceError);
}

/// Default sink: structured log events, nothing else.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl TelemetrySink for LogTelemetry {
    fn request_started(&self, model: &str, features_hash: &str) {
        tracing::debug!(model, features_hash, "inference request started");
    }

    fn request_completed(&self, model: &str, request_id: &str, elapsed_ms: u64) {
        tracing::info!(model, request_id, elapsed_ms, "inference request completed");
    }

    fn request_failed(&self, model: &str, features_hash: &str, error: &InferenceError) {
        tracing::warn!(model, features_hash, error = %error, "inference request failed");
    }
}
