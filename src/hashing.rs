//! Deterministic content hashing
//!
//! This module computes the two hashes the pipeline depends on for
//! idempotency:
//! - `features_hash`: SHA-256 over a stable serialization of the numeric
//!   payload (fixed float precision, fixed separator, fixed order). Two
//!   builders given bit-identical inputs produce identical hashes on any
//!   platform; there is no time component.
//! - `content_hash`: SHA-256 over (user, time bucket, model identity,
//!   feature hash) — the idempotency key for persisted predictions.

use sha2::{Digest, Sha256};

use crate::types::{MinuteWindow, NormalizedVector};

/// Decimal places retained when serializing daily features for hashing.
/// Part of the feature-version contract; changing it changes every hash.
pub const HASH_FLOAT_PRECISION: usize = 6;

/// Hash a normalized daily vector under a feature version.
pub fn features_hash_daily(feature_version: &str, vector: &NormalizedVector) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feature_version.as_bytes());
    hasher.update(b"|");

    let mut first = true;
    for value in vector.as_slice() {
        if !first {
            hasher.update(b",");
        }
        first = false;
        hasher.update(format!("{:.*}", HASH_FLOAT_PRECISION, value).as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Hash a minute window under a scaler identity.
///
/// Hashes the little-endian byte representation of the wire values, so the
/// hash is sensitive to every bit of every sample.
pub fn features_hash_window(scaler_id: &str, window: &MinuteWindow) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scaler_id.as_bytes());
    hasher.update(b"|");
    for value in window.wire_values() {
        hasher.update(value.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Compute the idempotency key for a prediction.
pub fn content_hash(
    user_id: &str,
    bucket_ymd_local: &str,
    model_name: &str,
    model_version: &str,
    features_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        user_id,
        bucket_ymd_local,
        model_name,
        model_version,
        features_hash,
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MinuteWindow, FEATURE_COUNT, MINUTE_WINDOW_LEN};
    use pretty_assertions::assert_eq;

    fn make_vector() -> NormalizedVector {
        let mut values = [0.0; FEATURE_COUNT];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i as f64) / (FEATURE_COUNT as f64);
        }
        NormalizedVector(values)
    }

    #[test]
    fn test_daily_hash_is_pure() {
        let vector = make_vector();
        let a = features_hash_daily("v1", &vector);
        let b = features_hash_daily("v1", &vector.clone());

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_daily_hash_changes_on_single_element_perturbation() {
        let vector = make_vector();
        let baseline = features_hash_daily("v1", &vector);

        for i in 0..FEATURE_COUNT {
            let mut perturbed = vector.clone();
            perturbed.0[i] = (perturbed.0[i] + 0.000_1).min(1.0);
            assert_ne!(
                baseline,
                features_hash_daily("v1", &perturbed),
                "perturbing element {i} did not change the hash"
            );
        }
    }

    #[test]
    fn test_daily_hash_depends_on_feature_version() {
        let vector = make_vector();
        assert_ne!(
            features_hash_daily("v1", &vector),
            features_hash_daily("v2", &vector)
        );
    }

    #[test]
    fn test_window_hash_is_order_sensitive() {
        let mut values = vec![0.0_f32; MINUTE_WINDOW_LEN];
        values[0] = 0.5;
        let a = MinuteWindow::new(values.clone()).unwrap();

        values[0] = 0.0;
        values[1] = 0.5;
        let b = MinuteWindow::new(values).unwrap();

        assert_ne!(
            features_hash_window("nhanes_v1", &a),
            features_hash_window("nhanes_v1", &b)
        );
    }

    #[test]
    fn test_content_hash_components_are_delimited() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = content_hash("ab", "c", "m", "1", "h");
        let b = content_hash("a", "bc", "m", "1", "h");
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_hash_stable_for_same_inputs() {
        let a = content_hash("user-1", "2024-03-01", "big-mood-detector", "1.2.0", "feat");
        let b = content_hash("user-1", "2024-03-01", "big-mood-detector", "1.2.0", "feat");
        assert_eq!(a, b);
    }
}
