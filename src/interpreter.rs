//! Response interpretation
//!
//! This module reduces the two model response shapes to one canonical MEA
//! outcome:
//! - Class responses: probabilities used directly, or logits run through a
//!   softmax; confidence is the predicted class's probability; the predicted
//!   class maps through a fixed five-entry MEA lookup table.
//! - Direct MEA responses: passed through after range validation.
//!
//! The class label order is an explicit configuration value validated against
//! the response's own `class_labels` on every call, never a hardcoded
//! assumption — a relabeled server surfaces as a validation failure instead
//! of a silently mismapped mood.

use crate::error::InferenceError;
use crate::types::{
    ClassScores, InferenceResponse, MeaOutcome, MeaScores, ResponseBody, CLASS_LABELS,
};

/// Fixed MEA lookup, index-aligned with the canonical class label order
/// `[normal, depressive, stressed, anxious, happy]`.
pub const CLASS_MEA_TABLE: [(u8, u8, u8); 5] = [
    (65, 6, 3), // normal
    (25, 3, 6), // depressive
    (45, 5, 7), // stressed
    (40, 5, 8), // anxious
    (85, 9, 2), // happy
];

/// Interpreter configured with the expected class label order
#[derive(Debug, Clone)]
pub struct ResponseInterpreter {
    expected_labels: Vec<String>,
}

impl Default for ResponseInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseInterpreter {
    /// Interpreter expecting the canonical label order.
    pub fn new() -> Self {
        Self {
            expected_labels: CLASS_LABELS.iter().map(|l| l.as_str().to_string()).collect(),
        }
    }

    /// Interpreter with an explicit label order, index-aligned with
    /// `CLASS_MEA_TABLE`. Anything other than exactly five labels is
    /// rejected here, so the probability and table lookups below can never
    /// index past the configured order.
    pub fn with_labels(expected_labels: Vec<String>) -> Result<Self, InferenceError> {
        if expected_labels.len() != CLASS_MEA_TABLE.len() {
            return Err(InferenceError::Validation(format!(
                "expected {} class labels, got {}",
                CLASS_MEA_TABLE.len(),
                expected_labels.len()
            )));
        }
        Ok(Self { expected_labels })
    }

    /// Reduce a raw response to a canonical MEA outcome.
    ///
    /// Deterministic: the same response always interprets to the same
    /// outcome (ties in class probabilities break to the lowest index).
    pub fn interpret(&self, response: &InferenceResponse) -> Result<MeaOutcome, InferenceError> {
        let (mood, energy, anxiety, confidence) = match &response.body {
            ResponseBody::Class(scores) => self.interpret_class(scores, &response.request_id)?,
            ResponseBody::Direct(scores) => interpret_direct(scores, &response.request_id)?,
        };

        Ok(MeaOutcome {
            mood,
            energy,
            anxiety,
            confidence,
            model_name: response.model.clone(),
            model_version: response.model_version.clone(),
            request_id: response.request_id.clone(),
        })
    }

    fn interpret_class(
        &self,
        scores: &ClassScores,
        request_id: &str,
    ) -> Result<(u8, u8, u8, f64), InferenceError> {
        if scores.class_labels != self.expected_labels {
            return Err(InferenceError::Validation(format!(
                "class labels {:?} do not match expected order {:?} (request {})",
                scores.class_labels, self.expected_labels, request_id
            )));
        }

        let probs = match (&scores.probs, &scores.logits) {
            (Some(probs), _) => {
                validate_probs(probs, request_id)?;
                probs.clone()
            }
            (None, Some(logits)) => {
                if logits.len() != self.expected_labels.len() {
                    return Err(InferenceError::Validation(format!(
                        "expected {} logits, got {} (request {})",
                        self.expected_labels.len(),
                        logits.len(),
                        request_id
                    )));
                }
                softmax(logits)
            }
            (None, None) => {
                return Err(InferenceError::Validation(format!(
                    "class response carries neither probs nor logits (request {request_id})"
                )));
            }
        };

        let predicted = match &scores.top_class {
            Some(label) => self
                .expected_labels
                .iter()
                .position(|l| l == label)
                .ok_or_else(|| {
                    InferenceError::Validation(format!(
                        "top_class '{label}' is not a known label (request {request_id})"
                    ))
                })?,
            None => argmax(&probs),
        };

        // Confidence is the predicted class's probability. It differs from
        // the max probability only when a server-supplied top_class
        // overrides the argmax.
        let confidence = probs[predicted];
        let (mood, energy, anxiety) = CLASS_MEA_TABLE[predicted];
        Ok((mood, energy, anxiety, confidence))
    }
}

fn interpret_direct(
    scores: &MeaScores,
    request_id: &str,
) -> Result<(u8, u8, u8, f64), InferenceError> {
    if scores.mood > 100 {
        return Err(InferenceError::Validation(format!(
            "mood {} outside 0..=100 (request {request_id})",
            scores.mood
        )));
    }
    for (name, value) in [("energy", scores.energy), ("anxiety", scores.anxiety)] {
        if !(1..=10).contains(&value) {
            return Err(InferenceError::Validation(format!(
                "{name} {value} outside 1..=10 (request {request_id})"
            )));
        }
    }
    if !(0.0..=1.0).contains(&scores.confidence) {
        return Err(InferenceError::Validation(format!(
            "confidence {} outside 0..=1 (request {request_id})",
            scores.confidence
        )));
    }

    Ok((scores.mood, scores.energy, scores.anxiety, scores.confidence))
}

fn validate_probs(probs: &[f64], request_id: &str) -> Result<(), InferenceError> {
    if probs.len() != CLASS_MEA_TABLE.len() {
        return Err(InferenceError::Validation(format!(
            "expected {} probabilities, got {} (request {request_id})",
            CLASS_MEA_TABLE.len(),
            probs.len()
        )));
    }
    for &p in probs {
        if !(0.0..=1.0).contains(&p) || !p.is_finite() {
            return Err(InferenceError::Validation(format!(
                "probability {p} outside [0,1] (request {request_id})"
            )));
        }
    }
    Ok(())
}

/// Numerically stable softmax (shifts by the max logit before exponentiating).
fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

/// Index of the largest value; ties break to the lowest index because only a
/// strictly greater value displaces the current winner.
fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}
