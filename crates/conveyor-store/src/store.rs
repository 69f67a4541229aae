//! The queue store contract.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use conveyor_core::{Job, MessageId, Result, StoreMetrics};

/// Durable message store with visibility-timeout semantics.
///
/// Everything above this trait (client, worker, health) is store-agnostic;
/// the contract below is what the engine actually relies on:
///
/// - `send`/`send_batch` are durable once they return, and a batch is
///   all-or-nothing.
/// - A message handed out by `read` is invisible to other readers for the
///   visibility timeout. If it is neither deleted nor archived before the
///   window expires, the store makes it redeliverable with an incremented
///   read count. That redelivery is the engine's only retry mechanism.
/// - `delete` and `archive` are idempotent: the second call for the same
///   message returns `false` rather than erroring.
///
/// Implementations must tolerate several processes reading the same queue;
/// the visibility timeout is the only cross-process mutual exclusion.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Enqueue one message, returning its store-assigned id.
    ///
    /// With `delay` set, the message stays invisible until the delay
    /// elapses.
    async fn send(
        &self,
        queue: &str,
        payload: JsonValue,
        delay: Option<Duration>,
    ) -> Result<MessageId>;

    /// Enqueue a batch atomically, returning ids in input order.
    async fn send_batch(
        &self,
        queue: &str,
        payloads: Vec<JsonValue>,
        delay: Option<Duration>,
    ) -> Result<Vec<MessageId>>;

    /// Read up to `max_messages`, making each invisible for
    /// `visibility_timeout`.
    ///
    /// With `wait` set this long-polls: it blocks up to `wait`, returning
    /// early as soon as at least one message is available. With `wait`
    /// unset it returns immediately. Never blocks past the cap, and an
    /// empty result is a normal outcome.
    async fn read(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        max_messages: i32,
        wait: Option<Duration>,
    ) -> Result<Vec<Job>>;

    /// Permanently remove a message (successful completion).
    ///
    /// Returns `false` if the message no longer exists.
    async fn delete(&self, queue: &str, id: MessageId) -> Result<bool>;

    /// Move a message to the queue's archive (dead-letter) store.
    ///
    /// Returns `false` if the message no longer exists.
    async fn archive(&self, queue: &str, id: MessageId) -> Result<bool>;

    /// Authoritative queue statistics.
    async fn metrics(&self, queue: &str) -> Result<StoreMetrics>;

    /// Create the queue if it does not already exist.
    async fn ensure_queue(&self, queue: &str) -> Result<()>;

    /// Whether the store is reachable.
    async fn health_check(&self) -> bool;
}
