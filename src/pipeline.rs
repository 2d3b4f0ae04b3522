//! Pipeline orchestration
//!
//! This module provides the public API for the mood engine. It wires the
//! stages end to end: extraction → normalization → request construction →
//! inference → interpretation → idempotent enqueue. Each stage stays
//! independently callable; the pipeline only sequences them.

use std::sync::Arc;

use crate::client::{ClientConfig, InferenceClient};
use crate::error::InferenceError;
use crate::extractor::{DailyAggregates, FeatureExtractor};
use crate::interpreter::ResponseInterpreter;
use crate::normalizer::{Normalizer, PopulationScaler};
use crate::queue::{PredictionStore, SyncQueue};
use crate::request::RequestBuilder;
use crate::telemetry::{LogTelemetry, TelemetrySink};
use crate::types::{InferenceRequest, MoodPrediction, RawMinuteSeries};

/// End-to-end mood inference pipeline with a durable delivery queue.
///
/// One instance per process; cheap to share behind an `Arc`. All methods take
/// `&self` and internal state is synchronized, so concurrent calls for
/// different users proceed independently.
pub struct MoodPipeline {
    builder: RequestBuilder,
    client: InferenceClient,
    interpreter: ResponseInterpreter,
    queue: Arc<SyncQueue>,
    telemetry: Box<dyn TelemetrySink>,
}

impl MoodPipeline {
    /// Create a pipeline with default interpretation and logging telemetry.
    pub fn new(config: ClientConfig) -> Result<Self, InferenceError> {
        Ok(Self {
            builder: RequestBuilder::new(),
            client: InferenceClient::new(config)?,
            interpreter: ResponseInterpreter::new(),
            queue: Arc::new(SyncQueue::new()),
            telemetry: Box::new(LogTelemetry),
        })
    }

    /// Replace the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Run daily-features inference for one user and one calendar day.
    ///
    /// On success the prediction is already enqueued for delivery; the
    /// returned value is what the app can render immediately. On failure
    /// nothing is enqueued; callers may fall back to [`Self::last_known`].
    pub async fn run_daily(
        &self,
        user_id: &str,
        aggregates: &DailyAggregates,
    ) -> Result<MoodPrediction, InferenceError> {
        let features = FeatureExtractor::extract(aggregates);
        let vector = Normalizer::normalize(&features);
        let request = self.builder.build_daily(&vector);
        self.dispatch(user_id, &aggregates.date, request).await
    }

    /// Run minute-window inference for one user over a 7-day window.
    pub async fn run_minute_window(
        &self,
        user_id: &str,
        series: &RawMinuteSeries,
        scaler: &PopulationScaler,
    ) -> Result<MoodPrediction, InferenceError> {
        let mut window = Normalizer::normalize_minute_window(series)?;
        scaler.apply(&mut window)?;
        let request = self.builder.build_minute(&window)?;
        self.dispatch(user_id, &series.end_ymd_local, request).await
    }

    async fn dispatch(
        &self,
        user_id: &str,
        bucket_ymd_local: &str,
        request: InferenceRequest,
    ) -> Result<MoodPrediction, InferenceError> {
        let features_hash = request.features_hash().to_string();
        self.telemetry.request_started(request.model(), &features_hash);

        let response = match self.client.infer(&request).await {
            Ok(response) => response,
            Err(e) => {
                self.telemetry
                    .request_failed(request.model(), &features_hash, &e);
                return Err(e);
            }
        };
        self.telemetry.request_completed(
            &response.model,
            &response.request_id,
            response.elapsed_ms,
        );

        // A response that cannot be interpreted is still a failed run from
        // the telemetry collaborator's point of view
        let outcome = match self.interpreter.interpret(&response) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.telemetry
                    .request_failed(&response.model, &features_hash, &e);
                return Err(e);
            }
        };
        Ok(self
            .queue
            .enqueue(user_id, bucket_ymd_local, &features_hash, outcome)
            .await)
    }

    /// Deliver a user's pending predictions to the store, in order.
    pub async fn flush(
        &self,
        user_id: &str,
        store: &dyn PredictionStore,
    ) -> Result<usize, InferenceError> {
        self.queue.flush_user(user_id, store).await
    }

    /// Deliver every user's pending predictions.
    pub async fn flush_all(&self, store: &dyn PredictionStore) -> Result<usize, InferenceError> {
        self.queue.flush_all(store).await
    }

    /// Last delivered prediction for a user, if any. Fallback surface for
    /// offline or degraded operation.
    pub async fn last_known(&self, user_id: &str) -> Option<MoodPrediction> {
        self.queue.last_known(user_id).await
    }

    /// Number of predictions awaiting delivery for a user.
    pub async fn pending_count(&self, user_id: &str) -> usize {
        self.queue.pending_count(user_id).await
    }

    /// Serialize queue state for persistence by the host app.
    pub async fn save_queue(&self) -> Result<String, InferenceError> {
        self.queue.to_json().await
    }

    /// Restore queue state saved by [`Self::save_queue`].
    pub fn load_queue(&mut self, json: &str) -> Result<(), InferenceError> {
        self.queue = Arc::new(SyncQueue::from_json(json)?);
        Ok(())
    }
}
