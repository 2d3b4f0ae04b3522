//! Inference request construction
//!
//! This module serializes a normalized vector or minute window into the
//! versioned request envelope of the `POST /v1/infer` contract, attaching the
//! deterministic `features_hash` used downstream for idempotency. Pure
//! construction; no side effects.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::InferenceError;
use crate::hashing::{features_hash_daily, features_hash_window};
use crate::normalizer::FEATURE_VERSION;
use crate::types::{InferenceRequest, MinuteWindow, NormalizedVector, MINUTE_WINDOW_LEN};

/// Model served daily normalized feature vectors.
pub const DAILY_MODEL: &str = "big-mood-detector";

/// Model served minute-resolution windows.
pub const MINUTE_MODEL: &str = "pat-conv-l";

/// Builder for versioned inference requests
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    feature_version: String,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    /// Create a builder pinned to the current feature version.
    pub fn new() -> Self {
        Self {
            feature_version: FEATURE_VERSION.to_string(),
        }
    }

    /// Build a daily-features request.
    ///
    /// Infallible: the vector type guarantees the [0,1] invariant and the
    /// fixed length, and the hash is a pure function of the values.
    pub fn build_daily(&self, vector: &NormalizedVector) -> InferenceRequest {
        let features_hash = features_hash_daily(&self.feature_version, vector);

        InferenceRequest::DailyFeatures {
            model: DAILY_MODEL.to_string(),
            feature_version: self.feature_version.clone(),
            features: vector.as_slice().to_vec(),
            features_hash,
        }
    }

    /// Build a minute-window request.
    ///
    /// The window must already carry a scaler identity (applied by the
    /// normalizer); a window without one cannot be validated by the receiver
    /// and is rejected here, before any network call.
    pub fn build_minute(&self, window: &MinuteWindow) -> Result<InferenceRequest, InferenceError> {
        let scaler_id = window.scaler_id.as_deref().ok_or_else(|| {
            InferenceError::Validation(
                "minute window has no scaler identity; apply a population scaler first"
                    .to_string(),
            )
        })?;

        let wire = window.wire_values();
        if wire.len() != MINUTE_WINDOW_LEN {
            return Err(InferenceError::Validation(format!(
                "minute window length {} != {}",
                wire.len(),
                MINUTE_WINDOW_LEN
            )));
        }

        let features_hash = features_hash_window(scaler_id, window);

        Ok(InferenceRequest::MinuteWindow {
            model: MINUTE_MODEL.to_string(),
            scaler: scaler_id.to_string(),
            minute_window_b64: encode_f32_le(wire),
            features_hash,
        })
    }
}

/// Base64 over the little-endian byte representation of the samples.
fn encode_f32_le(values: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}
