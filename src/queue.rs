//! Idempotent sync queue
//!
//! This module owns the only durable shared state in the pipeline: an
//! append-only log of predictions pending delivery to the persistence
//! collaborator, keyed by content hash.
//!
//! - Enqueueing a prediction whose content hash (or whose (bucket, model
//!   name, model version) composite) is already pending replaces it in place,
//!   so retries and duplicate deliveries never create duplicate records.
//! - Flushing delivers per user in original enqueue order, with the same
//!   backoff discipline as the inference client. A user's flush holds that
//!   user's lock for its duration; different users flush independently.
//! - An `Unavailable` failure suspends the flush, preserving the remaining
//!   entries for the next attempt (offline support).
//! - The whole state serializes to JSON so the host can persist it across
//!   process restarts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::client::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use crate::error::InferenceError;
use crate::hashing::content_hash;
use crate::types::{MeaOutcome, MoodPrediction};

/// Acknowledgement returned by the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertAck {
    pub content_hash: String,
    /// Whether an existing record was updated (as opposed to inserted)
    pub updated: bool,
}

/// Narrow interface to the persistence collaborator. Implementations must be
/// idempotent on `content_hash`: a repeated upsert updates in place or
/// no-ops, never duplicates.
#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn upsert(
        &self,
        user_id: &str,
        prediction: &MoodPrediction,
    ) -> Result<UpsertAck, InferenceError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserQueue {
    pending: VecDeque<MoodPrediction>,
    last_acked: Option<MoodPrediction>,
}

/// Serializable snapshot of the whole queue, including the backoff
/// configuration so a restore reproduces the queue it was saved from.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueSnapshot {
    users: HashMap<String, UserQueue>,
    #[serde(default = "default_max_retries")]
    max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    retry_delay_ms: u64,
}

fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

/// Durable, idempotent delivery queue for mood predictions
pub struct SyncQueue {
    // Outer map lock is never held across an await; the per-user async lock
    // is what serializes a user's flush.
    users: Mutex<HashMap<String, Arc<tokio::sync::Mutex<UserQueue>>>>,
    max_retries: usize,
    retry_delay_ms: u64,
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::with_backoff(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS)
    }

    pub fn with_backoff(max_retries: usize, retry_delay_ms: u64) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            max_retries,
            retry_delay_ms,
        }
    }

    fn user_queue(&self, user_id: &str) -> Arc<tokio::sync::Mutex<UserQueue>> {
        let mut users = self.users.lock().expect("queue map lock poisoned");
        users.entry(user_id.to_string()).or_default().clone()
    }

    /// Enqueue an interpreted outcome for delivery.
    ///
    /// Fills in the persistence fields (content hash, bucket, creation time)
    /// and returns the completed prediction. If an entry with the same
    /// content hash or the same (bucket, model name, model version)
    /// composite is already pending, it is replaced in place, keeping its
    /// position in the delivery order.
    pub async fn enqueue(
        &self,
        user_id: &str,
        bucket_ymd_local: &str,
        features_hash: &str,
        outcome: MeaOutcome,
    ) -> MoodPrediction {
        let hash = content_hash(
            user_id,
            bucket_ymd_local,
            &outcome.model_name,
            &outcome.model_version,
            features_hash,
        );

        let prediction = MoodPrediction {
            mood: outcome.mood,
            energy: outcome.energy,
            anxiety: outcome.anxiety,
            confidence: outcome.confidence,
            model_name: outcome.model_name,
            model_version: outcome.model_version,
            features_hash: features_hash.to_string(),
            content_hash: hash,
            bucket_ymd_local: bucket_ymd_local.to_string(),
            created_at: Utc::now(),
        };

        let queue = self.user_queue(user_id);
        let mut queue = queue.lock().await;

        let existing = queue.pending.iter_mut().find(|p| {
            p.content_hash == prediction.content_hash
                || (p.bucket_ymd_local == prediction.bucket_ymd_local
                    && p.model_name == prediction.model_name
                    && p.model_version == prediction.model_version)
        });

        match existing {
            Some(slot) => {
                tracing::debug!(
                    user = user_id,
                    content_hash = %prediction.content_hash,
                    "replacing pending prediction in place"
                );
                *slot = prediction.clone();
            }
            None => queue.pending.push_back(prediction.clone()),
        }

        prediction
    }

    /// Number of pending deliveries for a user.
    pub async fn pending_count(&self, user_id: &str) -> usize {
        self.user_queue(user_id).lock().await.pending.len()
    }

    /// Last prediction acknowledged by the store for a user, for callers
    /// that want a cached fallback when inference is unavailable.
    pub async fn last_known(&self, user_id: &str) -> Option<MoodPrediction> {
        self.user_queue(user_id).lock().await.last_acked.clone()
    }

    /// Flush a user's pending predictions in original enqueue order.
    ///
    /// Returns the number of entries delivered. On a retryable failure the
    /// per-entry backoff schedule applies; once exhausted the flush suspends
    /// with `Unavailable`, leaving the failed entry and everything behind it
    /// queued for the next attempt. The per-user lock is held throughout, so
    /// no two flushes for the same user can interleave.
    pub async fn flush_user(
        &self,
        user_id: &str,
        store: &dyn PredictionStore,
    ) -> Result<usize, InferenceError> {
        let queue = self.user_queue(user_id);
        let mut queue = queue.lock().await;
        let mut delivered = 0;

        while let Some(prediction) = queue.pending.front().cloned() {
            let ack = self.deliver_with_backoff(user_id, &prediction, store).await?;

            tracing::debug!(
                user = user_id,
                content_hash = %ack.content_hash,
                updated = ack.updated,
                "prediction delivered"
            );
            queue.pending.pop_front();
            queue.last_acked = Some(prediction);
            delivered += 1;
        }

        Ok(delivered)
    }

    /// Flush every user with pending entries, one user at a time. Callers
    /// that want cross-user parallelism can spawn `flush_user` per user
    /// instead; per-user ordering holds either way.
    pub async fn flush_all(&self, store: &dyn PredictionStore) -> Result<usize, InferenceError> {
        let user_ids: Vec<String> = {
            let users = self.users.lock().expect("queue map lock poisoned");
            users.keys().cloned().collect()
        };

        let mut delivered = 0;
        for user_id in user_ids {
            delivered += self.flush_user(&user_id, store).await?;
        }
        Ok(delivered)
    }

    async fn deliver_with_backoff(
        &self,
        user_id: &str,
        prediction: &MoodPrediction,
        store: &dyn PredictionStore,
    ) -> Result<UpsertAck, InferenceError> {
        let mut delays = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        loop {
            match store.upsert(user_id, prediction).await {
                Ok(ack) => return Ok(ack),
                Err(e) if e.is_retryable() => match delays.next() {
                    Some(wait) => {
                        tracing::warn!(
                            user = user_id,
                            content_hash = %prediction.content_hash,
                            error = %e,
                            "store upsert failed, backing off"
                        );
                        tokio::time::sleep(wait).await;
                    }
                    None => return Err(e),
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Serialize the queue state for durable storage by the host.
    pub async fn to_json(&self) -> Result<String, InferenceError> {
        let handles: Vec<(String, Arc<tokio::sync::Mutex<UserQueue>>)> = {
            let users = self.users.lock().expect("queue map lock poisoned");
            users.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut snapshot = QueueSnapshot {
            users: HashMap::new(),
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
        };
        for (user_id, handle) in handles {
            snapshot.users.insert(user_id, handle.lock().await.clone());
        }

        Ok(serde_json::to_string(&snapshot)?)
    }

    /// Restore a queue from a serialized snapshot, backoff configuration
    /// included.
    pub fn from_json(json: &str) -> Result<Self, InferenceError> {
        let snapshot: QueueSnapshot = serde_json::from_str(json)?;
        let queue = Self::with_backoff(snapshot.max_retries, snapshot.retry_delay_ms);
        {
            let mut users = queue.users.lock().expect("queue map lock poisoned");
            for (user_id, user_queue) in snapshot.users {
                users.insert(user_id, Arc::new(tokio::sync::Mutex::new(user_queue)));
            }
        }
        Ok(queue)
    }
}

/// In-memory store with upsert semantics, keyed by the idempotency
/// composite. Useful as a local cache and in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: tokio::sync::Mutex<MemoryStoreInner>,
    /// When set, every upsert fails with `Unavailable` (offline simulation)
    offline: std::sync::atomic::AtomicBool,
}

#[derive(Default)]
struct MemoryStoreInner {
    // (user, bucket, model_name, model_version) -> prediction
    records: HashMap<(String, String, String, String), MoodPrediction>,
    delivery_log: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    /// Content hashes in delivery order, duplicates included.
    pub async fn delivery_log(&self) -> Vec<String> {
        self.inner.lock().await.delivery_log.clone()
    }

    pub async fn get(&self, user_id: &str, bucket: &str) -> Option<MoodPrediction> {
        let inner = self.inner.lock().await;
        inner
            .records
            .iter()
            .find(|((user, b, _, _), _)| user == user_id && b == bucket)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl PredictionStore for MemoryStore {
    async fn upsert(
        &self,
        user_id: &str,
        prediction: &MoodPrediction,
    ) -> Result<UpsertAck, InferenceError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(InferenceError::Unavailable("store offline".to_string()));
        }

        let key = (
            user_id.to_string(),
            prediction.bucket_ymd_local.clone(),
            prediction.model_name.clone(),
            prediction.model_version.clone(),
        );

        let mut inner = self.inner.lock().await;
        let updated = inner.records.insert(key, prediction.clone()).is_some();
        inner.delivery_log.push(prediction.content_hash.clone());

        Ok(UpsertAck {
            content_hash: prediction.content_hash.clone(),
            updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_outcome(confidence: f64) -> MeaOutcome {
        MeaOutcome {
            mood: 72,
            energy: 7,
            anxiety: 3,
            confidence,
            model_name: "big-mood-detector".to_string(),
            model_version: "1.2.0".to_string(),
            request_id: "req-1".to_string(),
        }
    }

    fn fast_queue() -> SyncQueue {
        SyncQueue::with_backoff(1, 5)
    }

    #[tokio::test]
    async fn test_enqueue_same_content_hash_replaces_in_place() {
        let queue = fast_queue();

        queue
            .enqueue("user-1", "2024-03-01", "feat-a", make_outcome(0.5))
            .await;
        let replaced = queue
            .enqueue("user-1", "2024-03-01", "feat-a", make_outcome(0.9))
            .await;

        assert_eq!(queue.pending_count("user-1").await, 1);

        let store = MemoryStore::new();
        queue.flush_user("user-1", &store).await.unwrap();

        let stored = store.get("user-1", "2024-03-01").await.unwrap();
        assert_eq!(stored.content_hash, replaced.content_hash);
        // Latest value wins
        assert!((stored.confidence - 0.9).abs() < 1e-9);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_composite_different_features_still_dedupes() {
        let queue = fast_queue();

        // Same bucket and model but a re-extracted feature vector: the
        // newer prediction supersedes the pending one.
        queue
            .enqueue("user-1", "2024-03-01", "feat-a", make_outcome(0.5))
            .await;
        queue
            .enqueue("user-1", "2024-03-01", "feat-b", make_outcome(0.7))
            .await;

        assert_eq!(queue.pending_count("user-1").await, 1);
    }

    #[tokio::test]
    async fn test_offline_enqueue_then_flush_in_order() {
        let queue = fast_queue();
        let store = MemoryStore::new();
        store.set_offline(true);

        let mut hashes = Vec::new();
        for day in ["2024-03-01", "2024-03-02", "2024-03-03"] {
            let p = queue
                .enqueue("user-1", day, "feat", make_outcome(0.8))
                .await;
            hashes.push(p.content_hash);
        }

        // Disconnected: flush suspends and preserves all entries
        let result = queue.flush_user("user-1", &store).await;
        assert!(matches!(result, Err(InferenceError::Unavailable(_))));
        assert_eq!(queue.pending_count("user-1").await, 3);

        // Reconnect: everything flushes in original enqueue order
        store.set_offline(false);
        let delivered = queue.flush_user("user-1", &store).await.unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(queue.pending_count("user-1").await, 0);
        assert_eq!(store.delivery_log().await, hashes);
        assert_eq!(store.record_count().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_transport_ack_does_not_duplicate_records() {
        let queue = fast_queue();
        let store = MemoryStore::new();

        let prediction = queue
            .enqueue("user-1", "2024-03-01", "feat", make_outcome(0.8))
            .await;
        queue.flush_user("user-1", &store).await.unwrap();

        // The transport delivers the same prediction a second time; the
        // store upsert updates in place instead of inserting.
        let ack = store.upsert("user-1", &prediction).await.unwrap();
        assert!(ack.updated);
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let queue = fast_queue();
        let store = MemoryStore::new();

        queue
            .enqueue("user-1", "2024-03-01", "feat", make_outcome(0.8))
            .await;
        queue
            .enqueue("user-2", "2024-03-01", "feat", make_outcome(0.6))
            .await;

        let delivered = queue.flush_all(&store).await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(store.record_count().await, 2);
    }

    #[tokio::test]
    async fn test_last_known_tracks_acked_predictions() {
        let queue = fast_queue();
        let store = MemoryStore::new();

        assert!(queue.last_known("user-1").await.is_none());

        queue
            .enqueue("user-1", "2024-03-01", "feat", make_outcome(0.8))
            .await;
        queue.flush_user("user-1", &store).await.unwrap();

        let cached = queue.last_known("user-1").await.unwrap();
        assert_eq!(cached.bucket_ymd_local, "2024-03-01");
    }

    #[tokio::test]
    async fn test_serialization_preserves_backoff_configuration() {
        let queue = SyncQueue::with_backoff(7, 25);
        queue
            .enqueue("user-1", "2024-03-01", "feat", make_outcome(0.8))
            .await;

        let json = queue.to_json().await.unwrap();
        let restored = SyncQueue::from_json(&json).unwrap();

        assert_eq!(restored.max_retries, 7);
        assert_eq!(restored.retry_delay_ms, 25);
    }

    #[tokio::test]
    async fn test_queue_state_survives_serialization() {
        let queue = fast_queue();
        queue
            .enqueue("user-1", "2024-03-01", "feat", make_outcome(0.8))
            .await;
        queue
            .enqueue("user-1", "2024-03-02", "feat", make_outcome(0.7))
            .await;

        let json = queue.to_json().await.unwrap();
        let restored = SyncQueue::from_json(&json).unwrap();

        assert_eq!(restored.pending_count("user-1").await, 2);

        let store = MemoryStore::new();
        let delivered = restored.flush_user("user-1", &store).await.unwrap();
        assert_eq!(delivered, 2);
    }
}
