//! Core types for the moodsense pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw daily features, normalized vectors, minute windows, request
//! and response envelopes, and the canonical mood prediction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// Number of daily physiological features (fixed by feature version v1).
pub const FEATURE_COUNT: usize = 12;

/// Length of a minute-resolution window: 7 days x 1440 minutes.
pub const MINUTE_WINDOW_LEN: usize = 10_080;

/// Mood class labels in canonical order. The model's `class_labels` field
/// must match this order exactly; mismatches are a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassLabel {
    Normal,
    Depressive,
    Stressed,
    Anxious,
    Happy,
}

impl ClassLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::Normal => "normal",
            ClassLabel::Depressive => "depressive",
            ClassLabel::Stressed => "stressed",
            ClassLabel::Anxious => "anxious",
            ClassLabel::Happy => "happy",
        }
    }
}

/// Canonical class label order shared with the model contract.
pub const CLASS_LABELS: [ClassLabel; 5] = [
    ClassLabel::Normal,
    ClassLabel::Depressive,
    ClassLabel::Stressed,
    ClassLabel::Anxious,
    ClassLabel::Happy,
];

/// Raw per-day physiological aggregates, one record per local calendar day.
///
/// Every field is independently optional: a missing sensor reading passes
/// through as `None` and is only defaulted at normalization time. Immutable
/// once extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDailyFeatures {
    /// Local calendar day this record describes (YYYY-MM-DD)
    pub date: String,
    /// Resting heart rate (bpm)
    pub resting_hr_bpm: Option<f64>,
    /// Mean heart rate across the day (bpm)
    pub mean_hr_bpm: Option<f64>,
    /// Heart rate variance (bpm^2)
    pub hr_variance: Option<f64>,
    /// Median HRV SDNN (ms)
    pub hrv_sdnn_median_ms: Option<f64>,
    /// HRV RMSSD (ms)
    pub hrv_rmssd_ms: Option<f64>,
    /// Total step count
    pub steps: Option<f64>,
    /// Active energy burned (kcal)
    pub active_energy_kcal: Option<f64>,
    /// Stand hours
    pub stand_hours: Option<f64>,
    /// Total sleep duration (minutes)
    pub sleep_minutes: Option<f64>,
    /// Sleep efficiency (0-1)
    pub sleep_efficiency: Option<f64>,
    /// Deep sleep / total sleep (0-1)
    pub deep_sleep_ratio: Option<f64>,
    /// VO2max (ml/kg/min)
    pub vo2_max: Option<f64>,
}

impl RawDailyFeatures {
    /// Create an empty record for a given local day.
    pub fn empty(date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            resting_hr_bpm: None,
            mean_hr_bpm: None,
            hr_variance: None,
            hrv_sdnn_median_ms: None,
            hrv_rmssd_ms: None,
            steps: None,
            active_energy_kcal: None,
            stand_hours: None,
            sleep_minutes: None,
            sleep_efficiency: None,
            deep_sleep_ratio: None,
            vo2_max: None,
        }
    }

    /// Raw values in canonical feature order (index order is part of the
    /// feature-version contract and must not change within v1).
    pub fn ordered(&self) -> [Option<f64>; FEATURE_COUNT] {
        [
            self.resting_hr_bpm,
            self.mean_hr_bpm,
            self.hr_variance,
            self.hrv_sdnn_median_ms,
            self.hrv_rmssd_ms,
            self.steps,
            self.active_energy_kcal,
            self.stand_hours,
            self.sleep_minutes,
            self.sleep_efficiency,
            self.deep_sleep_ratio,
            self.vo2_max,
        ]
    }
}

/// Ordered sequence of 12 floats in [0,1], derived deterministically from
/// `RawDailyFeatures`. Construction goes through the normalizer, which
/// guarantees the range invariant by clipping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVector(pub [f64; FEATURE_COUNT]);

impl NormalizedVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// Event-style minute-resolution sample: a value attributed to a minute
/// offset within a 7-day window (0..10079).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MinuteEvent {
    pub offset_min: u32,
    pub value: f64,
}

/// Raw minute-resolution series for one user over a 7-day window, as handed
/// over by the health-data collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMinuteSeries {
    /// Local calendar day the window ends on (YYYY-MM-DD)
    pub end_ymd_local: String,
    /// Sparse event samples; minutes with no event contribute zero
    pub events: Vec<MinuteEvent>,
}

/// Fixed-length minute window: exactly 10,080 floats in [0,1], optionally
/// carrying a z-scored representation against a named population scaler.
///
/// The scaler identity is carried alongside the data, never implied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinuteWindow {
    values: Vec<f32>,
    /// Population scaler applied to produce `zscored`, if any
    pub scaler_id: Option<String>,
    /// Secondary `(x - mean) / std` representation, same length as `values`
    pub zscored: Option<Vec<f32>>,
}

impl MinuteWindow {
    /// Wrap a normalized minute series. Rejects any length other than
    /// exactly 10,080 before the data can reach a network call.
    pub fn new(values: Vec<f32>) -> Result<Self, InferenceError> {
        if values.len() != MINUTE_WINDOW_LEN {
            return Err(InferenceError::Validation(format!(
                "minute window length {} != {}",
                values.len(),
                MINUTE_WINDOW_LEN
            )));
        }
        Ok(Self {
            values,
            scaler_id: None,
            zscored: None,
        })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// The representation that goes on the wire: the z-scored series when a
    /// scaler has been applied, the [0,1] series otherwise.
    pub fn wire_values(&self) -> &[f32] {
        self.zscored.as_deref().unwrap_or(&self.values)
    }
}

/// Versioned inference request envelope. The tag doubles as the wire
/// `input_type` discriminant of the `POST /v1/infer` contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "input_type")]
pub enum InferenceRequest {
    /// 12 normalized daily features, pinned to a feature version
    #[serde(rename = "daily_features_norm01")]
    DailyFeatures {
        model: String,
        feature_version: String,
        features: Vec<f64>,
        features_hash: String,
    },
    /// Base64-encoded little-endian Float32 minute window
    #[serde(rename = "minute_window_f32_b64")]
    MinuteWindow {
        model: String,
        scaler: String,
        minute_window_b64: String,
        features_hash: String,
    },
}

impl InferenceRequest {
    pub fn model(&self) -> &str {
        match self {
            InferenceRequest::DailyFeatures { model, .. } => model,
            InferenceRequest::MinuteWindow { model, .. } => model,
        }
    }

    pub fn features_hash(&self) -> &str {
        match self {
            InferenceRequest::DailyFeatures { features_hash, .. } => features_hash,
            InferenceRequest::MinuteWindow { features_hash, .. } => features_hash,
        }
    }
}

/// Class-probability response body: ordered labels plus either probabilities
/// or logits over the five mood classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassScores {
    pub class_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probs: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logits: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_class: Option<String>,
}

/// Direct MEA response body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeaScores {
    /// Mood 0-100
    pub mood: u8,
    /// Energy 1-10
    pub energy: u8,
    /// Anxiety 1-10
    pub anxiety: u8,
    /// Confidence 0-1
    pub confidence: f64,
}

/// The two response shapes the model contract allows. The required field
/// sets are disjoint, so deserialization is unambiguous; the interpreter
/// matches on the variant before touching any field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Class(ClassScores),
    Direct(MeaScores),
}

/// Raw response envelope from the model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub model: String,
    pub model_version: String,
    pub elapsed_ms: u64,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: ResponseBody,
}

/// Canonical MEA result produced by the response interpreter. Persistence
/// fields (content hash, bucket, timestamps) are filled in by the sync queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeaOutcome {
    pub mood: u8,
    pub energy: u8,
    pub anxiety: u8,
    pub confidence: f64,
    pub model_name: String,
    pub model_version: String,
    pub request_id: String,
}

/// Canonical output record, owned by the pipeline until handed to the
/// persistence collaborator.
///
/// `content_hash` is the idempotency key: repeated deliveries with the same
/// hash overwrite-or-no-op, never duplicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodPrediction {
    /// Mood 0-100
    pub mood: u8,
    /// Energy 1-10
    pub energy: u8,
    /// Anxiety 1-10
    pub anxiety: u8,
    /// Confidence 0-1
    pub confidence: f64,
    pub model_name: String,
    pub model_version: String,
    pub features_hash: String,
    pub content_hash: String,
    /// Local calendar day this prediction is attributed to (YYYY-MM-DD)
    pub bucket_ymd_local: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minute_window_rejects_wrong_length() {
        let result = MinuteWindow::new(vec![0.5; 100]);
        assert!(matches!(result, Err(InferenceError::Validation(_))));

        let result = MinuteWindow::new(vec![0.5; MINUTE_WINDOW_LEN]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_request_serializes_with_input_type_tag() {
        let request = InferenceRequest::DailyFeatures {
            model: "big-mood-detector".to_string(),
            feature_version: "v1".to_string(),
            features: vec![0.5; FEATURE_COUNT],
            features_hash: "abc".to_string(),
        };

        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input_type"], "daily_features_norm01");
        assert_eq!(json["feature_version"], "v1");
        assert_eq!(json["features"].as_array().unwrap().len(), FEATURE_COUNT);
    }

    #[test]
    fn test_response_body_discriminates_class_vs_direct() {
        let class_json = r#"{
            "model": "big-mood-detector",
            "model_version": "1.2.0",
            "elapsed_ms": 120,
            "request_id": "req-1",
            "timestamp": "2024-03-01T08:00:00Z",
            "class_labels": ["normal", "depressive", "stressed", "anxious", "happy"],
            "probs": [0.05, 0.10, 0.12, 0.08, 0.65]
        }"#;

        let response: InferenceResponse = serde_json::from_str(class_json).unwrap();
        assert!(matches!(response.body, ResponseBody::Class(_)));

        let direct_json = r#"{
            "model": "big-mood-detector",
            "model_version": "1.2.0",
            "elapsed_ms": 95,
            "request_id": "req-2",
            "timestamp": "2024-03-01T08:00:00Z",
            "mood": 72, "energy": 7, "anxiety": 3, "confidence": 0.81
        }"#;

        let response: InferenceResponse = serde_json::from_str(direct_json).unwrap();
        assert!(matches!(response.body, ResponseBody::Direct(_)));
    }

    #[test]
    fn test_class_labels_canonical_order() {
        let rendered: Vec<&str> = CLASS_LABELS.iter().map(|l| l.as_str()).collect();
        assert_eq!(
            rendered,
            vec!["normal", "depressive", "stressed", "anxious", "happy"]
        );
    }
}
