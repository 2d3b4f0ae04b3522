//! Feature normalization
//!
//! This module maps raw physiological features into the bounded [0,1]
//! representation the model was trained on:
//! - Per-feature affine scaling `(x - offset) / scale` with clipping
//! - A fixed mapping table pinned to feature version `v1`
//! - Minute-window bucketing with optional population z-scoring
//!
//! The mapping table (order, offsets, scales, defaults) is part of the model
//! contract: any change requires a new feature version, because downstream
//! feature hashes and trained-model compatibility depend on it.

use serde::{Deserialize, Serialize};

use crate::error::InferenceError;
use crate::types::{
    MinuteWindow, NormalizedVector, RawDailyFeatures, RawMinuteSeries, FEATURE_COUNT,
    MINUTE_WINDOW_LEN,
};

/// Feature version pinning the v1 mapping table below.
pub const FEATURE_VERSION: &str = "v1";

/// Identifier of the bundled population scaler for minute windows.
pub const NHANES_SCALER_ID: &str = "nhanes_v1";

/// Cap applied to per-minute activity counts before scaling to [0,1].
/// 200 steps/minute is a fast run; anything above clips to 1.0.
pub const MINUTE_VALUE_CAP: f64 = 200.0;

/// Affine scaling parameters for one daily feature.
///
/// `default_raw` is the population-typical raw value substituted when the
/// sensor reading is absent; it normalizes to a mid-range point rather than
/// collapsing missing data to zero.
#[derive(Debug, Clone, Copy)]
pub struct FeatureScale {
    pub name: &'static str,
    pub offset: f64,
    pub scale: f64,
    /// Valid raw domain; values outside it clip at the [0,1] boundary
    pub domain: (f64, f64),
    pub default_raw: f64,
}

/// The v1 mapping table, index-aligned with `RawDailyFeatures::ordered()`.
pub const FEATURE_SCALES_V1: [FeatureScale; FEATURE_COUNT] = [
    FeatureScale {
        name: "resting_hr_bpm",
        offset: 40.0,
        scale: 60.0,
        domain: (40.0, 100.0),
        default_raw: 65.0,
    },
    FeatureScale {
        name: "mean_hr_bpm",
        offset: 50.0,
        scale: 70.0,
        domain: (50.0, 120.0),
        default_raw: 75.0,
    },
    FeatureScale {
        name: "hr_variance",
        offset: 0.0,
        scale: 400.0,
        domain: (0.0, 400.0),
        default_raw: 100.0,
    },
    FeatureScale {
        name: "hrv_sdnn_median_ms",
        offset: 0.0,
        scale: 150.0,
        domain: (0.0, 150.0),
        default_raw: 50.0,
    },
    FeatureScale {
        name: "hrv_rmssd_ms",
        offset: 0.0,
        scale: 120.0,
        domain: (0.0, 120.0),
        default_raw: 42.0,
    },
    FeatureScale {
        name: "steps",
        offset: 0.0,
        scale: 20_000.0,
        domain: (0.0, 20_000.0),
        default_raw: 6_000.0,
    },
    FeatureScale {
        name: "active_energy_kcal",
        offset: 0.0,
        scale: 1_500.0,
        domain: (0.0, 1_500.0),
        default_raw: 350.0,
    },
    FeatureScale {
        name: "stand_hours",
        offset: 0.0,
        scale: 16.0,
        domain: (0.0, 16.0),
        default_raw: 10.0,
    },
    FeatureScale {
        name: "sleep_minutes",
        offset: 0.0,
        scale: 720.0,
        domain: (0.0, 720.0),
        default_raw: 420.0,
    },
    FeatureScale {
        name: "sleep_efficiency",
        offset: 0.0,
        scale: 1.0,
        domain: (0.0, 1.0),
        default_raw: 0.88,
    },
    FeatureScale {
        name: "deep_sleep_ratio",
        offset: 0.0,
        scale: 0.5,
        domain: (0.0, 0.5),
        default_raw: 0.15,
    },
    FeatureScale {
        name: "vo2_max",
        offset: 20.0,
        scale: 40.0,
        domain: (20.0, 60.0),
        default_raw: 38.0,
    },
];

/// Normalizer for daily features and minute windows
pub struct Normalizer;

impl Normalizer {
    /// Normalize one day's raw features into the v1 vector.
    ///
    /// Pure function: the same input always produces the same vector. Absent
    /// inputs take the per-feature `default_raw` from the mapping table.
    /// Every element of the output is in [0,1].
    pub fn normalize(features: &RawDailyFeatures) -> NormalizedVector {
        let raw = features.ordered();
        let mut values = [0.0_f64; FEATURE_COUNT];

        for (i, scale) in FEATURE_SCALES_V1.iter().enumerate() {
            let x = raw[i].unwrap_or(scale.default_raw);
            values[i] = affine_clip(x, scale);
        }

        NormalizedVector(values)
    }

    /// Normalize an event-style minute series into a fixed 10,080-minute
    /// window in [0,1].
    ///
    /// Events are bucket-distributed by minute offset (multiple events in the
    /// same minute accumulate), scaled by `MINUTE_VALUE_CAP`, and clipped.
    /// Events outside the window are a validation failure, not a silent drop.
    pub fn normalize_minute_window(
        series: &RawMinuteSeries,
    ) -> Result<MinuteWindow, InferenceError> {
        let mut bins = vec![0.0_f64; MINUTE_WINDOW_LEN];

        for event in &series.events {
            let idx = event.offset_min as usize;
            if idx >= MINUTE_WINDOW_LEN {
                return Err(InferenceError::Validation(format!(
                    "minute event offset {} outside window of {} minutes",
                    event.offset_min, MINUTE_WINDOW_LEN
                )));
            }
            if !event.value.is_finite() || event.value < 0.0 {
                return Err(InferenceError::Validation(format!(
                    "minute event value {} at offset {} is not a non-negative finite number",
                    event.value, event.offset_min
                )));
            }
            bins[idx] += event.value;
        }

        let values: Vec<f32> = bins
            .iter()
            .map(|&v| ((v / MINUTE_VALUE_CAP).clamp(0.0, 1.0)) as f32)
            .collect();

        MinuteWindow::new(values)
    }
}

fn affine_clip(x: f64, scale: &FeatureScale) -> f64 {
    ((x - scale.offset) / scale.scale).clamp(0.0, 1.0)
}

/// Named population scaler for minute-resolution windows: per-index mean and
/// standard deviation arrays of exactly 10,080 elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationScaler {
    pub id: String,
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl PopulationScaler {
    /// Length mismatch is a fatal precondition failure, never a truncation.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.mean.len() != MINUTE_WINDOW_LEN || self.std.len() != MINUTE_WINDOW_LEN {
            return Err(InferenceError::IncompatibleVersion(format!(
                "scaler '{}' has {} mean / {} std entries, expected {}",
                self.id,
                self.mean.len(),
                self.std.len(),
                MINUTE_WINDOW_LEN
            )));
        }
        Ok(())
    }

    /// Apply `(x - mean) / std` per index, recording the scaler identity on
    /// the window. Indices with zero deviation pass through centered only.
    pub fn apply(&self, window: &mut MinuteWindow) -> Result<(), InferenceError> {
        self.validate()?;

        let zscored: Vec<f32> = window
            .values()
            .iter()
            .zip(self.mean.iter().zip(self.std.iter()))
            .map(|(&x, (&mean, &std))| {
                if std > f32::EPSILON {
                    (x - mean) / std
                } else {
                    x - mean
                }
            })
            .collect();

        window.zscored = Some(zscored);
        window.scaler_id = Some(self.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MinuteEvent;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_test_features() -> RawDailyFeatures {
        RawDailyFeatures {
            date: "2024-03-01".to_string(),
            resting_hr_bpm: Some(55.0),
            mean_hr_bpm: Some(72.0),
            hr_variance: Some(110.0),
            hrv_sdnn_median_ms: Some(48.0),
            hrv_rmssd_ms: Some(42.0),
            steps: Some(8500.0),
            active_energy_kcal: Some(450.0),
            stand_hours: Some(11.0),
            sleep_minutes: Some(420.0),
            sleep_efficiency: Some(0.875),
            deep_sleep_ratio: Some(0.2),
            vo2_max: Some(41.0),
        }
    }

    #[test]
    fn test_normalize_known_values() {
        let vector = Normalizer::normalize(&make_test_features());
        let v = vector.as_slice();

        // (55 - 40) / 60 = 0.25
        assert!((v[0] - 0.25).abs() < 1e-9);
        // 8500 / 20000 = 0.425
        assert!((v[5] - 0.425).abs() < 1e-9);
        // 420 / 720 ≈ 0.5833
        assert!((v[8] - 420.0 / 720.0).abs() < 1e-9);
        // (41 - 20) / 40 = 0.525
        assert!((v[11] - 0.525).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let features = make_test_features();
        assert_eq!(
            Normalizer::normalize(&features),
            Normalizer::normalize(&features)
        );
    }

    #[test]
    fn test_normalize_clips_out_of_domain_extremes() {
        let mut features = make_test_features();
        features.resting_hr_bpm = Some(300.0);
        features.steps = Some(-500.0);
        features.vo2_max = Some(0.0);

        let v = Normalizer::normalize(&features);
        assert_eq!(v.as_slice()[0], 1.0);
        assert_eq!(v.as_slice()[5], 0.0);
        assert_eq!(v.as_slice()[11], 0.0);
    }

    #[test]
    fn test_normalize_randomized_inputs_stay_bounded() {
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..1000 {
            let mut features = RawDailyFeatures::empty("2024-03-01");
            // Wildly out-of-domain values on purpose, plus random absences
            features.resting_hr_bpm = maybe(&mut rng, -1e6..1e6);
            features.mean_hr_bpm = maybe(&mut rng, -1e6..1e6);
            features.hr_variance = maybe(&mut rng, -1e6..1e6);
            features.hrv_sdnn_median_ms = maybe(&mut rng, -1e6..1e6);
            features.hrv_rmssd_ms = maybe(&mut rng, -1e6..1e6);
            features.steps = maybe(&mut rng, -1e6..1e6);
            features.active_energy_kcal = maybe(&mut rng, -1e6..1e6);
            features.stand_hours = maybe(&mut rng, -1e6..1e6);
            features.sleep_minutes = maybe(&mut rng, -1e6..1e6);
            features.sleep_efficiency = maybe(&mut rng, -1e6..1e6);
            features.deep_sleep_ratio = maybe(&mut rng, -1e6..1e6);
            features.vo2_max = maybe(&mut rng, -1e6..1e6);

            let vector = Normalizer::normalize(&features);
            for (i, &value) in vector.as_slice().iter().enumerate() {
                assert!(
                    (0.0..=1.0).contains(&value),
                    "feature {} out of range: {}",
                    FEATURE_SCALES_V1[i].name,
                    value
                );
            }
        }
    }

    fn maybe(rng: &mut StdRng, range: std::ops::Range<f64>) -> Option<f64> {
        if rng.gen_bool(0.8) {
            Some(rng.gen_range(range))
        } else {
            None
        }
    }

    #[test]
    fn test_absent_features_use_documented_defaults() {
        let empty = RawDailyFeatures::empty("2024-03-01");
        let vector = Normalizer::normalize(&empty);

        for (i, scale) in FEATURE_SCALES_V1.iter().enumerate() {
            let expected = ((scale.default_raw - scale.offset) / scale.scale).clamp(0.0, 1.0);
            assert!(
                (vector.as_slice()[i] - expected).abs() < 1e-9,
                "feature {} default mismatch",
                scale.name
            );
            // Defaults sit inside the open interval, not at a boundary
            assert!(vector.as_slice()[i] > 0.0 && vector.as_slice()[i] < 1.0);
        }
    }

    #[test]
    fn test_minute_window_buckets_and_scales() {
        let series = RawMinuteSeries {
            end_ymd_local: "2024-03-07".to_string(),
            events: vec![
                MinuteEvent {
                    offset_min: 0,
                    value: 100.0,
                },
                MinuteEvent {
                    offset_min: 0,
                    value: 50.0,
                },
                MinuteEvent {
                    offset_min: 10_079,
                    value: 500.0,
                },
            ],
        };

        let window = Normalizer::normalize_minute_window(&series).unwrap();
        assert_eq!(window.values().len(), MINUTE_WINDOW_LEN);
        // 150 / 200 = 0.75, accumulated across two events in the same minute
        assert!((window.values()[0] - 0.75).abs() < 1e-6);
        // 500 / 200 clips to 1.0
        assert_eq!(window.values()[10_079], 1.0);
        assert_eq!(window.values()[5_000], 0.0);
    }

    #[test]
    fn test_minute_window_rejects_out_of_window_event() {
        let series = RawMinuteSeries {
            end_ymd_local: "2024-03-07".to_string(),
            events: vec![MinuteEvent {
                offset_min: 10_080,
                value: 1.0,
            }],
        };

        let result = Normalizer::normalize_minute_window(&series);
        assert!(matches!(result, Err(InferenceError::Validation(_))));
    }

    #[test]
    fn test_scaler_wrong_length_is_fatal() {
        let scaler = PopulationScaler {
            id: NHANES_SCALER_ID.to_string(),
            mean: vec![0.0; 100],
            std: vec![1.0; 100],
        };

        assert!(matches!(
            scaler.validate(),
            Err(InferenceError::IncompatibleVersion(_))
        ));
    }

    #[test]
    fn test_scaler_apply_records_identity() {
        let scaler = PopulationScaler {
            id: NHANES_SCALER_ID.to_string(),
            mean: vec![0.1; MINUTE_WINDOW_LEN],
            std: vec![0.2; MINUTE_WINDOW_LEN],
        };

        let series = RawMinuteSeries {
            end_ymd_local: "2024-03-07".to_string(),
            events: vec![MinuteEvent {
                offset_min: 3,
                value: 100.0,
            }],
        };

        let mut window = Normalizer::normalize_minute_window(&series).unwrap();
        scaler.apply(&mut window).unwrap();

        assert_eq!(window.scaler_id.as_deref(), Some(NHANES_SCALER_ID));
        let zscored = window.zscored.as_ref().unwrap();
        assert_eq!(zscored.len(), MINUTE_WINDOW_LEN);
        // (0.5 - 0.1) / 0.2 = 2.0 at the event minute
        assert!((zscored[3] - 2.0).abs() < 1e-5);
        // (0.0 - 0.1) / 0.2 = -0.5 everywhere else
        assert!((zscored[0] + 0.5).abs() < 1e-5);
    }
}
