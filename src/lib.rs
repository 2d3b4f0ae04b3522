//! Moodsense - On-device mood inference pipeline for physiological time series
//!
//! Moodsense turns a day of health aggregates (or a week of minute-resolution
//! samples) into a mood/energy/anxiety prediction through a deterministic
//! pipeline: feature extraction → normalization → request construction →
//! remote inference → response interpretation → idempotent sync queue.
//!
//! ## Modules
//!
//! - **Daily pipeline**: 12 normalized features served to the daily mood model
//! - **Minute pipeline**: 7-day minute windows z-scored against a population
//!   scaler and served to the minute-resolution model
//! - **Sync queue**: durable, per-user ordered, idempotent delivery of
//!   predictions to the persistence collaborator

pub mod client;
pub mod error;
pub mod extractor;
pub mod hashing;
pub mod interpreter;
pub mod normalizer;
pub mod pipeline;
pub mod queue;
pub mod request;
pub mod telemetry;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use client::{ClientConfig, InferenceClient};
pub use error::InferenceError;
pub use extractor::{DailyAggregates, FeatureExtractor};
pub use interpreter::ResponseInterpreter;
pub use normalizer::{Normalizer, PopulationScaler};
pub use pipeline::MoodPipeline;
pub use queue::{MemoryStore, PredictionStore, SyncQueue, UpsertAck};
pub use request::RequestBuilder;
pub use telemetry::{LogTelemetry, TelemetrySink};
pub use types::{MeaOutcome, MoodPrediction, RawDailyFeatures, RawMinuteSeries};

/// Engine version embedded in telemetry and diagnostics
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for diagnostics
pub const PRODUCER_NAME: &str = "moodsense";
