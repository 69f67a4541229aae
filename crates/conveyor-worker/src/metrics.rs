//! Process-local queue metrics.
//!
//! Counters live in one [`QueueMetrics`] cell per queue, shared between
//! the client (enqueue side) and the worker (outcome side) through a
//! [`MetricsRegistry`]. The health monitor only ever reads snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use conveyor_core::MetricsSnapshot;

/// Running-average state, guarded as a unit because the sample count and
/// the average must move together.
#[derive(Debug, Default)]
struct AvgState {
    samples: u64,
    avg_ms: f64,
}

/// Counters for a single queue, maintained by the local process.
///
/// All counters are monotonic except `depth`, which is a gauge: up on
/// enqueue, down on terminal outcome, never below zero. A redelivery wait
/// is not a terminal outcome, so retries leave the gauge alone.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    depth: AtomicI64,
    avg: Mutex<AvgState>,
}

impl QueueMetrics {
    /// Record `count` jobs enqueued through this process.
    pub fn record_enqueued(&self, count: u64) {
        self.enqueued.fetch_add(count, Ordering::SeqCst);
        self.depth.fetch_add(count as i64, Ordering::SeqCst);
    }

    /// Record a successful completion and fold its duration into the
    /// running average.
    pub async fn record_processed(&self, elapsed_ms: f64) {
        self.processed.fetch_add(1, Ordering::SeqCst);
        self.decrement_depth();

        let mut avg = self.avg.lock().await;
        avg.samples += 1;
        let n = avg.samples as f64;
        avg.avg_ms = ((avg.avg_ms * (n - 1.0)) + elapsed_ms) / n;
    }

    /// Record a failed delivery left for redelivery.
    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a dead-lettered job.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.decrement_depth();
    }

    /// Saturating gauge decrement.
    ///
    /// A worker can ack jobs enqueued by a different process, so the local
    /// gauge would otherwise go negative.
    fn decrement_depth(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
                if d > 0 {
                    Some(d - 1)
                } else {
                    None
                }
            });
    }

    /// Point-in-time copy of every counter.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let avg = self.avg.lock().await;
        MetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            avg_processing_ms: avg.avg_ms,
            current_depth: self.depth.load(Ordering::SeqCst),
        }
    }
}

/// Shared registry of per-queue metrics cells.
///
/// Cheap to clone; every clone sees the same cells.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    queues: Arc<RwLock<HashMap<String, Arc<QueueMetrics>>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics cell for `queue`, created on first use.
    pub async fn for_queue(&self, queue: &str) -> Arc<QueueMetrics> {
        {
            let queues = self.queues.read().await;
            if let Some(metrics) = queues.get(queue) {
                return metrics.clone();
            }
        }

        let mut queues = self.queues.write().await;
        queues.entry(queue.to_string()).or_default().clone()
    }

    /// Snapshot every queue this process has touched.
    pub async fn snapshot_all(&self) -> HashMap<String, MetricsSnapshot> {
        let cells: Vec<(String, Arc<QueueMetrics>)> = {
            let queues = self.queues.read().await;
            queues
                .iter()
                .map(|(name, metrics)| (name.clone(), metrics.clone()))
                .collect()
        };

        let mut snapshots = HashMap::with_capacity(cells.len());
        for (name, metrics) in cells {
            snapshots.insert(name, metrics.snapshot().await);
        }
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_raises_counter_and_depth() {
        let metrics = QueueMetrics::default();
        metrics.record_enqueued(3);

        let snap = metrics.snapshot().await;
        assert_eq!(snap.enqueued, 3);
        assert_eq!(snap.current_depth, 3);
    }

    #[tokio::test]
    async fn processed_lowers_depth_and_tracks_average() {
        let metrics = QueueMetrics::default();
        metrics.record_enqueued(2);
        metrics.record_processed(100.0).await;
        metrics.record_processed(200.0).await;

        let snap = metrics.snapshot().await;
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.current_depth, 0);
        assert!((snap.avg_processing_ms - 150.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn average_is_cumulative_over_all_samples() {
        let metrics = QueueMetrics::default();
        metrics.record_processed(100.0).await;
        metrics.record_processed(200.0).await;
        metrics.record_processed(600.0).await;

        let snap = metrics.snapshot().await;
        assert!((snap.avg_processing_ms - 300.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn retried_leaves_depth_alone() {
        let metrics = QueueMetrics::default();
        metrics.record_enqueued(1);
        metrics.record_retried();
        metrics.record_retried();

        let snap = metrics.snapshot().await;
        assert_eq!(snap.retried, 2);
        assert_eq!(snap.current_depth, 1);
    }

    #[tokio::test]
    async fn failed_lowers_depth() {
        let metrics = QueueMetrics::default();
        metrics.record_enqueued(1);
        metrics.record_failed();

        let snap = metrics.snapshot().await;
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.current_depth, 0);
    }

    #[tokio::test]
    async fn depth_never_goes_negative() {
        let metrics = QueueMetrics::default();

        // Acks for jobs this process never enqueued.
        metrics.record_processed(10.0).await;
        metrics.record_failed();

        let snap = metrics.snapshot().await;
        assert_eq!(snap.current_depth, 0);
    }

    #[tokio::test]
    async fn counters_survive_concurrent_updates() {
        let metrics = Arc::new(QueueMetrics::default());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let metrics = metrics.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    metrics.record_enqueued(1);
                    metrics.record_processed(50.0).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snap = metrics.snapshot().await;
        assert_eq!(snap.enqueued, 100);
        assert_eq!(snap.processed, 100);
        assert_eq!(snap.current_depth, 0);
        assert!((snap.avg_processing_ms - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn registry_returns_same_cell_for_same_queue() {
        let registry = MetricsRegistry::new();

        let a = registry.for_queue("q").await;
        let b = registry.for_queue("q").await;
        a.record_enqueued(1);

        assert_eq!(b.snapshot().await.enqueued, 1);
    }

    #[tokio::test]
    async fn registry_snapshot_all_covers_known_queues() {
        let registry = MetricsRegistry::new();
        registry.for_queue("a").await.record_enqueued(1);
        registry.for_queue("b").await.record_enqueued(2);

        let snapshots = registry.snapshot_all().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots["a"].enqueued, 1);
        assert_eq!(snapshots["b"].enqueued, 2);
    }

    #[tokio::test]
    async fn registry_clones_share_state() {
        let registry = MetricsRegistry::new();
        let clone = registry.clone();

        registry.for_queue("q").await.record_enqueued(5);
        assert_eq!(clone.snapshot_all().await["q"].enqueued, 5);
    }
}
