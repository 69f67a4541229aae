//! Typed queue client and multi-queue producer.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use conveyor_core::{Job, MessageId, QueueConfig, Result, StoreMetrics};
use conveyor_store::QueueStore;

use crate::metrics::{MetricsRegistry, QueueMetrics};

/// Client bound to a single queue.
///
/// Owns the queue's configuration (batch size, poll timeout, visibility
/// timeout) and the serialization boundary: callers hand it typed payloads,
/// the store only ever sees JSON. Enqueues are recorded against the queue's
/// local metrics cell.
#[derive(Clone)]
pub struct QueueClient {
    store: Arc<dyn QueueStore>,
    config: QueueConfig,
    metrics: Arc<QueueMetrics>,
}

impl QueueClient {
    /// Bind a client to `config.queue`, attaching it to the queue's
    /// metrics cell in `registry`.
    pub async fn new(
        store: Arc<dyn QueueStore>,
        config: QueueConfig,
        registry: &MetricsRegistry,
    ) -> Self {
        let metrics = registry.for_queue(&config.queue).await;
        Self {
            store,
            config,
            metrics,
        }
    }

    /// The queue this client is bound to.
    pub fn queue(&self) -> &str {
        &self.config.queue
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The queue's local metrics cell.
    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }

    /// Serialize and enqueue one payload.
    pub async fn send<T: Serialize>(&self, payload: &T) -> Result<MessageId> {
        self.send_inner(payload, None).await
    }

    /// Serialize and enqueue one payload, invisible until `delay` elapses.
    pub async fn send_delayed<T: Serialize>(
        &self,
        payload: &T,
        delay: Duration,
    ) -> Result<MessageId> {
        self.send_inner(payload, Some(delay)).await
    }

    async fn send_inner<T: Serialize>(
        &self,
        payload: &T,
        delay: Option<Duration>,
    ) -> Result<MessageId> {
        let value = serde_json::to_value(payload)?;
        let id = self.store.send(&self.config.queue, value, delay).await?;
        self.metrics.record_enqueued(1);
        debug!(
            queue = %self.config.queue,
            msg_id = %id,
            "Job enqueued"
        );
        Ok(id)
    }

    /// Serialize and enqueue a batch atomically, returning ids in input
    /// order. An empty batch is a no-op.
    pub async fn send_batch<T: Serialize>(&self, payloads: &[T]) -> Result<Vec<MessageId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let values = payloads
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let ids = self
            .store
            .send_batch(&self.config.queue, values, None)
            .await?;
        self.metrics.record_enqueued(ids.len() as u64);
        debug!(
            queue = %self.config.queue,
            message_count = ids.len(),
            "Job batch enqueued"
        );
        Ok(ids)
    }

    /// Long-poll for up to the configured poll timeout, returning as soon
    /// as at least one job is available.
    pub async fn read_with_poll(&self) -> Result<Vec<Job>> {
        self.read_with_poll_for(self.config.poll_timeout).await
    }

    /// Long-poll with an explicit wait cap.
    pub async fn read_with_poll_for(&self, wait: Duration) -> Result<Vec<Job>> {
        self.store
            .read(
                &self.config.queue,
                self.config.visibility_timeout,
                self.config.batch_size,
                Some(wait),
            )
            .await
    }

    /// Non-blocking read of whatever is visible right now.
    pub async fn read_now(&self) -> Result<Vec<Job>> {
        self.store
            .read(
                &self.config.queue,
                self.config.visibility_timeout,
                self.config.batch_size,
                None,
            )
            .await
    }

    /// Acknowledge a completed job. Returns `false` if it was already gone.
    pub async fn delete(&self, id: MessageId) -> Result<bool> {
        self.store.delete(&self.config.queue, id).await
    }

    /// Dead-letter a job into the queue's archive. Returns `false` if it
    /// was already gone.
    pub async fn archive(&self, id: MessageId) -> Result<bool> {
        self.store.archive(&self.config.queue, id).await
    }

    /// Number of messages currently waiting in the store.
    pub async fn queue_depth(&self) -> Result<i64> {
        Ok(self.store_metrics().await?.queue_length)
    }

    /// Authoritative store-side statistics for this queue.
    pub async fn store_metrics(&self) -> Result<StoreMetrics> {
        self.store.metrics(&self.config.queue).await
    }

    /// Create the queue if it does not already exist.
    pub async fn ensure_queue(&self) -> Result<()> {
        self.store.ensure_queue(&self.config.queue).await
    }
}

/// Per-enqueue options for [`Producer`].
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Keep the message invisible until the delay elapses.
    pub delay: Option<Duration>,
}

/// Enqueue-only facade over many queues.
///
/// For call sites (API handlers, schedulers) that feed several queues and
/// never consume. Uses each queue's metrics cell from the shared registry
/// so producer-side counts land in the same place the workers update.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn QueueStore>,
    registry: MetricsRegistry,
}

impl Producer {
    pub fn new(store: Arc<dyn QueueStore>, registry: MetricsRegistry) -> Self {
        Self { store, registry }
    }

    /// Serialize and enqueue one payload onto `queue`.
    pub async fn enqueue<T: Serialize>(&self, queue: &str, payload: &T) -> Result<MessageId> {
        self.enqueue_with(queue, payload, EnqueueOptions::default())
            .await
    }

    /// Enqueue with explicit options.
    pub async fn enqueue_with<T: Serialize>(
        &self,
        queue: &str,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<MessageId> {
        let value = serde_json::to_value(payload)?;
        let id = self.store.send(queue, value, options.delay).await?;
        self.registry.for_queue(queue).await.record_enqueued(1);
        debug!(queue, msg_id = %id, "Job enqueued");
        Ok(id)
    }

    /// Enqueue a batch atomically onto `queue`, returning ids in input
    /// order.
    pub async fn enqueue_batch<T: Serialize>(
        &self,
        queue: &str,
        payloads: &[T],
    ) -> Result<Vec<MessageId>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let values = payloads
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let ids = self.store.send_batch(queue, values, None).await?;
        self.registry
            .for_queue(queue)
            .await
            .record_enqueued(ids.len() as u64);
        debug!(queue, message_count = ids.len(), "Job batch enqueued");
        Ok(ids)
    }
}
