//! Feature extraction
//!
//! This module turns a calendar day's raw health-source aggregates into a
//! `RawDailyFeatures` record. No normalization, no clipping: missing
//! aggregates pass through as absent and are only defaulted downstream.

use serde::{Deserialize, Serialize};

use crate::types::RawDailyFeatures;

/// One local calendar day of aggregates as supplied by the health-data
/// collaborator. Every field is independently optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyAggregates {
    /// Local calendar day (YYYY-MM-DD)
    pub date: String,
    pub resting_hr_bpm: Option<f64>,
    pub mean_hr_bpm: Option<f64>,
    pub hr_variance: Option<f64>,
    pub hrv_sdnn_median_ms: Option<f64>,
    pub hrv_rmssd_ms: Option<f64>,
    pub steps: Option<f64>,
    pub active_energy_kcal: Option<f64>,
    pub stand_hours: Option<f64>,
    /// Total sleep duration (minutes)
    pub sleep_minutes: Option<f64>,
    /// Time in bed (minutes); used to derive efficiency when the source does
    /// not report it directly
    pub in_bed_minutes: Option<f64>,
    pub sleep_efficiency: Option<f64>,
    /// Deep sleep duration (minutes); used to derive the deep-sleep ratio
    pub deep_sleep_minutes: Option<f64>,
    pub deep_sleep_ratio: Option<f64>,
    pub vo2_max: Option<f64>,
}

/// Extractor for producing the per-day feature record
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Extract a `RawDailyFeatures` record from one day's aggregates.
    ///
    /// Pure transform. Sleep efficiency and deep-sleep ratio are derived from
    /// their components when the source reports the components but not the
    /// ratio; otherwise values pass through unchanged.
    pub fn extract(aggregates: &DailyAggregates) -> RawDailyFeatures {
        let sleep_efficiency = aggregates
            .sleep_efficiency
            .or_else(|| derive_ratio(aggregates.sleep_minutes, aggregates.in_bed_minutes));

        let deep_sleep_ratio = aggregates
            .deep_sleep_ratio
            .or_else(|| derive_ratio(aggregates.deep_sleep_minutes, aggregates.sleep_minutes));

        RawDailyFeatures {
            date: aggregates.date.clone(),
            resting_hr_bpm: aggregates.resting_hr_bpm,
            mean_hr_bpm: aggregates.mean_hr_bpm,
            hr_variance: aggregates.hr_variance,
            hrv_sdnn_median_ms: aggregates.hrv_sdnn_median_ms,
            hrv_rmssd_ms: aggregates.hrv_rmssd_ms,
            steps: aggregates.steps,
            active_energy_kcal: aggregates.active_energy_kcal,
            stand_hours: aggregates.stand_hours,
            sleep_minutes: aggregates.sleep_minutes,
            sleep_efficiency,
            deep_sleep_ratio,
            vo2_max: aggregates.vo2_max,
        }
    }
}

fn derive_ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(num), Some(den)) if den > 0.0 => Some((num / den).clamp(0.0, 1.0)),
        _ => None,
    }
}
