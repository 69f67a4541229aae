//! Core data models for conveyor.
//!
//! These types are shared across all conveyor crates and represent the
//! messages, counters, and health verdicts the engine moves around.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Store-assigned message identifier.
///
/// PGMQ hands out monotonically increasing bigints; the newtype keeps them
/// from being confused with counts or depths in signatures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Raw store value, for SQL binds and log fields.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        MessageId(id)
    }
}

/// A job read from a queue.
///
/// Delivery is at-least-once: the same job may be handed to more than one
/// handler invocation over its lifetime. `read_count` is 1 on the first
/// delivery and grows with every redelivery, which is what attempt-aware
/// retry policy keys on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: MessageId,
    /// Application-defined payload; the engine never inspects it.
    pub payload: JsonValue,
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    /// Deserialize the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

// =============================================================================
// METRICS TYPES
// =============================================================================

/// Authoritative queue statistics reported by the store.
///
/// Unlike [`MetricsSnapshot`] these reflect every producer and worker
/// attached to the queue, not just the local process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetrics {
    pub queue: String,
    /// Messages currently waiting or in flight.
    pub queue_length: i64,
    /// Seconds since the newest message was enqueued.
    pub newest_msg_age_sec: Option<i64>,
    /// Seconds since the oldest message was enqueued.
    pub oldest_msg_age_sec: Option<i64>,
    /// Messages ever sent to the queue, including deleted and archived.
    pub total_messages: i64,
}

/// Point-in-time copy of a queue's process-local counters.
///
/// Counters reset on process restart, and under multi-process deployment
/// each process sees only its own share of the traffic. Treat these as
/// advisory; cluster-wide truth lives in [`StoreMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Jobs enqueued through this process (monotonic).
    pub enqueued: u64,
    /// Jobs completed successfully (monotonic).
    pub processed: u64,
    /// Jobs dead-lettered after exhausting retries (monotonic).
    pub failed: u64,
    /// Retry decisions taken, counting each redelivery wait (monotonic).
    pub retried: u64,
    /// Cumulative running average of successful handler time.
    pub avg_processing_ms: f64,
    /// Local view of outstanding jobs; floored at zero.
    pub current_depth: i64,
}

impl MetricsSnapshot {
    /// Lifetime error rate: `failed / (processed + failed)`.
    ///
    /// Returns 0.0 when nothing has finished yet rather than dividing by
    /// zero, so an idle queue reads as healthy.
    pub fn error_rate(&self) -> f64 {
        let finished = self.processed + self.failed;
        if finished == 0 {
            return 0.0;
        }
        self.failed as f64 / finished as f64
    }
}

// =============================================================================
// HEALTH TYPES
// =============================================================================

/// Health verdict for a single queue.
///
/// Derived on demand from a [`MetricsSnapshot`]; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    /// One entry per breached threshold; empty when healthy.
    pub issues: Vec<String>,
    pub last_check: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_id_display_and_raw() {
        let id = MessageId(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.as_i64(), 42);
        assert_eq!(MessageId::from(7), MessageId(7));
    }

    #[test]
    fn message_id_orders_by_value() {
        assert!(MessageId(1) < MessageId(2));
        assert!(MessageId(100) > MessageId(99));
    }

    #[test]
    fn message_id_serializes_transparently() {
        let id = MessageId(123);
        assert_eq!(serde_json::to_string(&id).unwrap(), "123");
    }

    #[test]
    fn job_payload_as_typed() {
        #[derive(Deserialize)]
        struct Payload {
            video_id: String,
        }

        let job = Job {
            id: MessageId(1),
            payload: json!({"video_id": "abc123"}),
            read_count: 1,
            enqueued_at: Utc::now(),
        };

        let payload: Payload = job.payload_as().unwrap();
        assert_eq!(payload.video_id, "abc123");
    }

    #[test]
    fn job_payload_as_wrong_shape_is_serialization_error() {
        let job = Job {
            id: MessageId(1),
            payload: json!({"other": true}),
            read_count: 1,
            enqueued_at: Utc::now(),
        };

        let result: Result<i32> = job.payload_as();
        match result {
            Err(crate::error::Error::Serialization(_)) => {}
            other => panic!("Expected Serialization error, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn error_rate_zero_denominator_is_zero() {
        let snapshot = MetricsSnapshot {
            enqueued: 10,
            processed: 0,
            failed: 0,
            retried: 3,
            avg_processing_ms: 0.0,
            current_depth: 10,
        };
        assert_eq!(snapshot.error_rate(), 0.0);
    }

    #[test]
    fn error_rate_counts_only_terminal_outcomes() {
        let snapshot = MetricsSnapshot {
            enqueued: 0,
            processed: 9,
            failed: 1,
            retried: 100,
            avg_processing_ms: 0.0,
            current_depth: 0,
        };
        assert!((snapshot.error_rate() - 0.1).abs() < f64::EPSILON);
    }
}
