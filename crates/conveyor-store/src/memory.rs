//! In-memory queue store.
//!
//! A visibility-timeout-faithful stand-in for PGMQ, used by the test suite
//! and for development without Postgres. The semantics the engine relies on
//! (redelivery after expiry, incrementing read counts, idempotent terminal
//! operations) match the Postgres store; only durability is missing.
//!
//! Visibility bookkeeping uses the tokio clock, so tests running under
//! `start_paused` can advance time deterministically.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use conveyor_core::defaults;
use conveyor_core::{Job, MessageId, Result, StoreMetrics};

use crate::store::QueueStore;

/// A message held by the in-memory store.
#[derive(Debug, Clone)]
struct StoredMessage {
    id: i64,
    payload: JsonValue,
    read_count: i32,
    enqueued_at: DateTime<Utc>,
    /// Invisible until this instant; send delays and visibility timeouts
    /// both land here.
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    /// Live messages in id order.
    messages: Vec<StoredMessage>,
    /// Dead-lettered messages, in archive order.
    archived: Vec<StoredMessage>,
    /// Messages ever sent, including deleted and archived.
    total_sent: i64,
}

impl QueueState {
    fn to_job(msg: &StoredMessage) -> Job {
        Job {
            id: MessageId(msg.id),
            payload: msg.payload.clone(),
            read_count: msg.read_count,
            enqueued_at: msg.enqueued_at,
        }
    }
}

/// In-memory [`QueueStore`] implementation.
///
/// Queues are provisioned on first use; `ensure_queue` exists for parity
/// with the Postgres store but is never required.
#[derive(Default)]
pub struct MemoryStore {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs that have been dead-lettered for `queue`.
    ///
    /// Inspection helper; PGMQ's analog is reading the `a_<queue>` archive
    /// table.
    pub async fn archived(&self, queue: &str) -> Vec<Job> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        state.archived.iter().map(QueueState::to_job).collect()
    }

    /// One non-blocking read pass.
    async fn try_read(&self, queue: &str, visibility_timeout: Duration, max: i32) -> Vec<Job> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let now = Instant::now();

        let mut batch = Vec::new();
        for msg in state.messages.iter_mut() {
            if (batch.len() as i32) >= max {
                break;
            }
            if msg.visible_at <= now {
                msg.read_count += 1;
                msg.visible_at = now + visibility_timeout;
                batch.push(QueueState::to_job(msg));
            }
        }
        batch
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn send(
        &self,
        queue: &str,
        payload: JsonValue,
        delay: Option<Duration>,
    ) -> Result<MessageId> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();

        state.next_id += 1;
        state.total_sent += 1;
        state.messages.push(StoredMessage {
            id: state.next_id,
            payload,
            read_count: 0,
            enqueued_at: Utc::now(),
            visible_at: Instant::now() + delay.unwrap_or(Duration::ZERO),
        });

        Ok(MessageId(state.next_id))
    }

    async fn send_batch(
        &self,
        queue: &str,
        payloads: Vec<JsonValue>,
        delay: Option<Duration>,
    ) -> Result<Vec<MessageId>> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let visible_at = Instant::now() + delay.unwrap_or(Duration::ZERO);
        let now = Utc::now();

        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            state.next_id += 1;
            state.total_sent += 1;
            state.messages.push(StoredMessage {
                id: state.next_id,
                payload,
                read_count: 0,
                enqueued_at: now,
                visible_at,
            });
            ids.push(MessageId(state.next_id));
        }

        Ok(ids)
    }

    async fn read(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        max_messages: i32,
        wait: Option<Duration>,
    ) -> Result<Vec<Job>> {
        let deadline = wait.map(|w| Instant::now() + w);

        loop {
            let batch = self.try_read(queue, visibility_timeout, max_messages).await;
            if !batch.is_empty() {
                return Ok(batch);
            }

            match deadline {
                Some(deadline) if Instant::now() < deadline => {
                    sleep(Duration::from_millis(defaults::LONG_POLL_INTERVAL_MS)).await;
                }
                _ => return Ok(batch),
            }
        }
    }

    async fn delete(&self, queue: &str, id: MessageId) -> Result<bool> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();

        match state.messages.iter().position(|m| m.id == id.as_i64()) {
            Some(idx) => {
                state.messages.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn archive(&self, queue: &str, id: MessageId) -> Result<bool> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();

        match state.messages.iter().position(|m| m.id == id.as_i64()) {
            Some(idx) => {
                let msg = state.messages.remove(idx);
                state.archived.push(msg);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn metrics(&self, queue: &str) -> Result<StoreMetrics> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue.to_string()).or_default();
        let now = Utc::now();

        // Ages cover every live message, visible or in flight.
        let oldest = state
            .messages
            .iter()
            .map(|m| m.enqueued_at)
            .min()
            .map(|t| (now - t).num_seconds());
        let newest = state
            .messages
            .iter()
            .map(|m| m.enqueued_at)
            .max()
            .map(|t| (now - t).num_seconds());

        Ok(StoreMetrics {
            queue: queue.to_string(),
            queue_length: state.messages.len() as i64,
            oldest_msg_age_sec: oldest,
            newest_msg_age_sec: newest,
            total_messages: state.total_sent,
        })
    }

    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::advance;

    const VT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn send_assigns_sequential_ids_per_queue() {
        let store = MemoryStore::new();

        let a1 = store.send("a", json!({"n": 1}), None).await.unwrap();
        let a2 = store.send("a", json!({"n": 2}), None).await.unwrap();
        let b1 = store.send("b", json!({"n": 3}), None).await.unwrap();

        assert_eq!(a1, MessageId(1));
        assert_eq!(a2, MessageId(2));
        assert_eq!(b1, MessageId(1)); // queues count independently
    }

    #[tokio::test]
    async fn first_read_reports_count_one_and_hides_message() {
        let store = MemoryStore::new();
        store.send("q", json!({"v": 1}), None).await.unwrap();

        let batch = store.read("q", VT, 10, None).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].read_count, 1);

        // In flight now, so a second immediate read sees nothing.
        let batch = store.read("q", VT, 10, None).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_redelivers_with_incremented_count() {
        let store = MemoryStore::new();
        store.send("q", json!({"v": 1}), None).await.unwrap();

        let first = store.read("q", VT, 10, None).await.unwrap();
        assert_eq!(first[0].read_count, 1);

        advance(VT + Duration::from_secs(1)).await;

        let second = store.read("q", VT, 10, None).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].read_count, 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        let id = store.send("q", json!({}), None).await.unwrap();

        assert!(store.delete("q", id).await.unwrap());
        assert!(!store.delete("q", id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_works_while_message_in_flight() {
        let store = MemoryStore::new();
        let id = store.send("q", json!({}), None).await.unwrap();

        let batch = store.read("q", VT, 10, None).await.unwrap();
        assert_eq!(batch.len(), 1);

        // The normal ack path: delete during the visibility window.
        assert!(store.delete("q", id).await.unwrap());
        assert!(store.read("q", VT, 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archive_is_idempotent_and_preserves_payload() {
        let store = MemoryStore::new();
        let id = store.send("q", json!({"keep": "me"}), None).await.unwrap();

        assert!(store.archive("q", id).await.unwrap());
        assert!(!store.archive("q", id).await.unwrap());

        let archived = store.archived("q").await;
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].payload, json!({"keep": "me"}));
    }

    #[tokio::test(start_paused = true)]
    async fn archived_message_is_never_redelivered() {
        let store = MemoryStore::new();
        let id = store.send("q", json!({}), None).await.unwrap();

        store.read("q", VT, 10, None).await.unwrap();
        store.archive("q", id).await.unwrap();

        advance(VT * 2).await;
        assert!(store.read("q", VT, 10, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_send_preserves_order() {
        let store = MemoryStore::new();
        let ids = store
            .send_batch("q", vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})], None)
            .await
            .unwrap();

        assert_eq!(ids, vec![MessageId(1), MessageId(2), MessageId(3)]);

        let batch = store.read("q", VT, 10, None).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].payload, json!({"n": 1}));
        assert_eq!(batch[2].payload, json!({"n": 3}));
    }

    #[tokio::test]
    async fn read_respects_max_messages() {
        let store = MemoryStore::new();
        for n in 0..5 {
            store.send("q", json!({ "n": n }), None).await.unwrap();
        }

        let batch = store.read("q", VT, 3, None).await.unwrap();
        assert_eq!(batch.len(), 3);

        let rest = store.read("q", VT, 10, None).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_send_stays_invisible_until_delay_elapses() {
        let store = MemoryStore::new();
        store
            .send("q", json!({}), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        assert!(store.read("q", VT, 10, None).await.unwrap().is_empty());

        advance(Duration::from_secs(11)).await;
        assert_eq!(store.read("q", VT, 10, None).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_early_when_message_arrives() {
        let store = std::sync::Arc::new(MemoryStore::new());

        let sender = store.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(300)).await;
            sender.send("q", json!({"late": true}), None).await.unwrap();
        });

        let batch = store
            .read("q", VT, 10, Some(Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_returns_empty_at_deadline() {
        let store = MemoryStore::new();

        let start = Instant::now();
        let batch = store
            .read("q", VT, 10, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn metrics_track_length_and_total() {
        let store = MemoryStore::new();
        let id1 = store.send("q", json!({}), None).await.unwrap();
        store.send("q", json!({}), None).await.unwrap();

        let m = store.metrics("q").await.unwrap();
        assert_eq!(m.queue_length, 2);
        assert_eq!(m.total_messages, 2);
        assert!(m.oldest_msg_age_sec.is_some());

        // Deleting shrinks the queue but not the lifetime total.
        store.delete("q", id1).await.unwrap();
        let m = store.metrics("q").await.unwrap();
        assert_eq!(m.queue_length, 1);
        assert_eq!(m.total_messages, 2);
    }

    #[tokio::test]
    async fn metrics_in_flight_messages_still_count() {
        let store = MemoryStore::new();
        store.send("q", json!({}), None).await.unwrap();
        store.read("q", VT, 10, None).await.unwrap();

        let m = store.metrics("q").await.unwrap();
        assert_eq!(m.queue_length, 1);
    }

    #[tokio::test]
    async fn metrics_empty_queue_has_no_ages() {
        let store = MemoryStore::new();
        store.ensure_queue("q").await.unwrap();

        let m = store.metrics("q").await.unwrap();
        assert_eq!(m.queue_length, 0);
        assert_eq!(m.oldest_msg_age_sec, None);
        assert_eq!(m.newest_msg_age_sec, None);
    }

    #[tokio::test]
    async fn queues_are_isolated() {
        let store = MemoryStore::new();
        store.send("a", json!({"q": "a"}), None).await.unwrap();

        assert!(store.read("b", VT, 10, None).await.unwrap().is_empty());
        assert_eq!(store.read("a", VT, 10, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_queue_is_idempotent() {
        let store = MemoryStore::new();
        store.ensure_queue("q").await.unwrap();
        store.send("q", json!({}), None).await.unwrap();
        store.ensure_queue("q").await.unwrap();

        // Re-ensuring never clears existing messages.
        assert_eq!(store.metrics("q").await.unwrap().queue_length, 1);
    }
}
