//! FFI bindings for moodsense
//!
//! This module exposes the pure pipeline stages to host apps via a C ABI:
//! normalization, response interpretation, and content hashing. The network
//! client and sync queue stay on the Rust side; hosts that embed the full
//! pipeline drive it through the library API instead.
//!
//! All functions use C strings (null-terminated) and return allocated memory
//! that must be freed by the caller using `moodsense_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use serde::Serialize;

use crate::extractor::{DailyAggregates, FeatureExtractor};
use crate::hashing::{content_hash, features_hash_daily};
use crate::interpreter::ResponseInterpreter;
use crate::normalizer::{Normalizer, FEATURE_VERSION};
use crate::types::InferenceResponse;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Normalized daily vector as returned across the FFI boundary.
#[derive(Serialize)]
struct NormalizedDaily {
    date: String,
    feature_version: &'static str,
    features: Vec<f64>,
    features_hash: String,
}

/// Normalize one day of raw aggregates.
///
/// Input: JSON-encoded daily aggregates (every field optional except `date`).
/// Output: JSON with the 12 normalized features and their deterministic hash.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with
///   `moodsense_free_string`.
/// - Returns NULL on error; call `moodsense_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn moodsense_normalize_daily(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let aggregates: DailyAggregates = match serde_json::from_str(&json_str) {
        Ok(a) => a,
        Err(e) => {
            set_last_error(&format!("Invalid daily aggregates JSON: {e}"));
            return ptr::null_mut();
        }
    };

    let features = FeatureExtractor::extract(&aggregates);
    let vector = Normalizer::normalize(&features);
    let result = NormalizedDaily {
        date: features.date.clone(),
        feature_version: FEATURE_VERSION,
        features: vector.as_slice().to_vec(),
        features_hash: features_hash_daily(FEATURE_VERSION, &vector),
    };

    match serde_json::to_string(&result) {
        Ok(out) => string_to_cstr(&out),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Interpret a raw model response into a canonical MEA outcome.
///
/// Input: JSON-encoded response envelope (class probs, logits, or direct MEA).
/// Output: JSON-encoded MEA outcome.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with
///   `moodsense_free_string`.
/// - Returns NULL on error; call `moodsense_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn moodsense_interpret(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let response: InferenceResponse = match serde_json::from_str(&json_str) {
        Ok(r) => r,
        Err(e) => {
            set_last_error(&format!("Invalid response JSON: {e}"));
            return ptr::null_mut();
        }
    };

    let outcome = match ResponseInterpreter::new().interpret(&response) {
        Ok(o) => o,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    match serde_json::to_string(&outcome) {
        Ok(out) => string_to_cstr(&out),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Compute the idempotency key for a prediction.
///
/// # Safety
/// - All arguments must be valid null-terminated C strings.
/// - Returns a newly allocated hex string that must be freed with
///   `moodsense_free_string`.
/// - Returns NULL on error; call `moodsense_last_error` for the message.
#[no_mangle]
pub unsafe extern "C" fn moodsense_content_hash(
    user_id: *const c_char,
    bucket_ymd_local: *const c_char,
    model_name: *const c_char,
    model_version: *const c_char,
    features_hash: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let args = [
        ("user_id", user_id),
        ("bucket_ymd_local", bucket_ymd_local),
        ("model_name", model_name),
        ("model_version", model_version),
        ("features_hash", features_hash),
    ];

    let mut values = Vec::with_capacity(args.len());
    for (name, arg) in args {
        match cstr_to_string(arg) {
            Some(s) => values.push(s),
            None => {
                set_last_error(&format!("Invalid {name} string pointer"));
                return ptr::null_mut();
            }
        }
    }

    let hash = content_hash(&values[0], &values[1], &values[2], &values[3], &values[4]);
    string_to_cstr(&hash)
}

/// Free a string returned by moodsense functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a moodsense function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn moodsense_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next moodsense call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn moodsense_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the moodsense library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn moodsense_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn sample_aggregates_json() -> CString {
        CString::new(
            r#"{
            "date": "2024-03-01",
            "resting_hr_bpm": 55.0,
            "mean_hr_bpm": 72.0,
            "hrv_rmssd_ms": 42.0,
            "steps": 8500.0,
            "sleep_minutes": 420.0,
            "in_bed_minutes": 480.0
        }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_ffi_normalize_daily() {
        let json = sample_aggregates_json();

        unsafe {
            let result = moodsense_normalize_daily(json.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let parsed: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(parsed["feature_version"], "v1");
            assert_eq!(parsed["features"].as_array().unwrap().len(), 12);
            assert_eq!(parsed["features_hash"].as_str().unwrap().len(), 64);

            moodsense_free_string(result);
        }
    }

    #[test]
    fn test_ffi_interpret() {
        let json = CString::new(
            r#"{
            "model": "big-mood-detector",
            "model_version": "1.2.0",
            "elapsed_ms": 120,
            "request_id": "req-1",
            "timestamp": "2024-03-01T08:00:00Z",
            "class_labels": ["normal", "depressive", "stressed", "anxious", "happy"],
            "probs": [0.05, 0.10, 0.12, 0.08, 0.65]
        }"#,
        )
        .unwrap();

        unsafe {
            let result = moodsense_interpret(json.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let parsed: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(parsed["mood"], 85);
            assert_eq!(parsed["energy"], 9);
            assert_eq!(parsed["anxiety"], 2);

            moodsense_free_string(result);
        }
    }

    #[test]
    fn test_ffi_content_hash() {
        let user = CString::new("user-1").unwrap();
        let bucket = CString::new("2024-03-01").unwrap();
        let model = CString::new("big-mood-detector").unwrap();
        let version = CString::new("1.2.0").unwrap();
        let features = CString::new("feat").unwrap();

        unsafe {
            let result = moodsense_content_hash(
                user.as_ptr(),
                bucket.as_ptr(),
                model.as_ptr(),
                version.as_ptr(),
                features.as_ptr(),
            );
            assert!(!result.is_null());

            let hash = CStr::from_ptr(result).to_str().unwrap();
            assert_eq!(hash.len(), 64);
            assert_eq!(
                hash,
                content_hash("user-1", "2024-03-01", "big-mood-detector", "1.2.0", "feat")
            );

            moodsense_free_string(result);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let invalid = CString::new("not json").unwrap();

        unsafe {
            let result = moodsense_normalize_daily(invalid.as_ptr());
            assert!(result.is_null());

            let error = moodsense_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = moodsense_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
