//! Queue worker: long-poll consumption, bounded dispatch, outcome
//! reconciliation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use conveyor_core::{
    classify, defaults, Error, FailureKind, HandlerError, Job, MessageId, Result, RetryDecision,
};

use crate::client::QueueClient;
use crate::handler::JobHandler;
use crate::metrics::QueueMetrics;

/// Configuration for a queue worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of handlers running at once.
    pub max_concurrent: usize,
    /// Delivery count at which a failing job is dead-lettered.
    pub max_attempts: i32,
    /// Delay before the next poll after an empty read, in milliseconds.
    pub empty_poll_delay_ms: u64,
    /// Delay before the next poll after a failed read, in milliseconds.
    pub error_backoff_ms: u64,
    /// Per-job handler deadline. `None` lets handlers run unbounded; the
    /// visibility timeout still ends the store-side claim either way.
    pub handler_timeout: Option<Duration>,
    /// Whether this worker processes jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::WORKER_MAX_CONCURRENT,
            max_attempts: defaults::MAX_ATTEMPTS,
            empty_poll_delay_ms: defaults::WORKER_EMPTY_POLL_DELAY_MS,
            error_backoff_ms: defaults::WORKER_ERROR_BACKOFF_MS,
            handler_timeout: None,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `WORKER_MAX_CONCURRENT` | `4` | Max handlers running at once |
    /// | `WORKER_MAX_ATTEMPTS` | `3` | Delivery count that dead-letters |
    /// | `WORKER_EMPTY_POLL_DELAY_MS` | `1000` | Delay after an empty poll |
    /// | `WORKER_ERROR_BACKOFF_MS` | `5000` | Delay after a failed poll |
    /// | `WORKER_HANDLER_TIMEOUT_SECS` | unset | Per-job deadline; `0` or unset disables |
    pub fn from_env() -> Self {
        let enabled = std::env::var("WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKER_MAX_CONCURRENT)
            .max(1);

        let max_attempts = std::env::var("WORKER_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::MAX_ATTEMPTS)
            .max(1);

        let empty_poll_delay_ms = std::env::var("WORKER_EMPTY_POLL_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKER_EMPTY_POLL_DELAY_MS);

        let error_backoff_ms = std::env::var("WORKER_ERROR_BACKOFF_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKER_ERROR_BACKOFF_MS);

        let handler_timeout = std::env::var("WORKER_HANDLER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&secs| secs > 0)
            .map(Duration::from_secs);

        Self {
            max_concurrent,
            max_attempts,
            empty_poll_delay_ms,
            error_backoff_ms,
            handler_timeout,
            enabled,
        }
    }

    /// Set maximum concurrent handlers.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the delivery count at which a failing job is dead-lettered.
    pub fn with_max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay after an empty poll.
    pub fn with_empty_poll_delay(mut self, ms: u64) -> Self {
        self.empty_poll_delay_ms = ms;
        self
    }

    /// Set the delay after a failed poll.
    pub fn with_error_backoff(mut self, ms: u64) -> Self {
        self.error_backoff_ms = ms;
        self
    }

    /// Set or clear the per-job handler deadline.
    pub fn with_handler_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handler_timeout = timeout;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by a queue worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker started polling.
    WorkerStarted { queue: String },
    /// Worker stopped.
    WorkerStopped { queue: String },
    /// A job was handed to its handler.
    JobStarted {
        queue: String,
        msg_id: MessageId,
        attempt: i32,
    },
    /// A job completed and was acknowledged.
    JobCompleted {
        queue: String,
        msg_id: MessageId,
        duration_ms: u64,
    },
    /// A job failed and was left for redelivery.
    JobRetried {
        queue: String,
        msg_id: MessageId,
        attempt: i32,
        error: String,
    },
    /// A job failed terminally and was archived.
    JobDeadLettered {
        queue: String,
        msg_id: MessageId,
        attempt: i32,
        error: String,
    },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    ///
    /// In-flight handlers finish; unread and retried messages stay in the
    /// store for the next worker.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that drains one queue.
///
/// Long-polls the store through its [`QueueClient`], dispatches each read
/// batch with bounded concurrency, and reconciles every outcome: delete on
/// success, leave for redelivery on a retryable failure, archive on a
/// terminal one. Failed polls back off instead of tearing the loop down.
pub struct QueueWorker {
    client: QueueClient,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    metrics: Arc<QueueMetrics>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl QueueWorker {
    /// Create a worker with default configuration.
    pub fn new(client: QueueClient, handler: Arc<dyn JobHandler>) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let metrics = client.metrics();
        Self {
            client,
            handler,
            config: WorkerConfig::default(),
            metrics,
            event_tx,
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);

        tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop.
    ///
    /// Each iteration long-polls for a batch, dispatches it concurrently,
    /// and waits for the whole batch to reconcile before polling again.
    /// Only sleeps when the queue is empty or the poll failed.
    #[instrument(skip(self, shutdown_rx), fields(queue = %self.client.queue()))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Queue worker is disabled, not starting");
            return;
        }

        info!(
            max_concurrent = self.config.max_concurrent,
            max_attempts = self.config.max_attempts,
            "Queue worker started"
        );

        let _ = self.event_tx.send(WorkerEvent::WorkerStarted {
            queue: self.client.queue().to_string(),
        });

        let empty_delay = Duration::from_millis(self.config.empty_poll_delay_ms);
        let error_backoff = Duration::from_millis(self.config.error_backoff_ms);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));

        loop {
            // Check for shutdown before polling
            if shutdown_rx.try_recv().is_ok() {
                info!("Queue worker received shutdown signal");
                break;
            }

            let polled = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Queue worker received shutdown signal");
                    break;
                }
                polled = self.client.read_with_poll() => polled,
            };

            match polled {
                Ok(batch) if batch.is_empty() => {
                    // Queue empty, sleep before polling again
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Queue worker received shutdown signal");
                            break;
                        }
                        _ = sleep(empty_delay) => {}
                    }
                }
                Ok(batch) => {
                    debug!(message_count = batch.len(), "Dispatching job batch");

                    let mut tasks = tokio::task::JoinSet::new();
                    for job in batch {
                        let runner = self.runner(semaphore.clone());
                        tasks.spawn(async move {
                            runner.execute(job).await;
                        });
                    }

                    // Wait for the whole batch to reconcile
                    while let Some(result) = tasks.join_next().await {
                        if let Err(e) = result {
                            error!(error = ?e, "Job task panicked");
                        }
                    }
                    // No sleep, immediately poll for more jobs
                }
                Err(e) => {
                    error!(error = %e, "Failed to poll queue");
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("Queue worker received shutdown signal");
                            break;
                        }
                        _ = sleep(error_backoff) => {}
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped {
            queue: self.client.queue().to_string(),
        });
        info!("Queue worker stopped");
    }

    /// Clone references needed for a spawned job task.
    fn runner(&self, semaphore: Arc<Semaphore>) -> JobRunner {
        JobRunner {
            client: self.client.clone(),
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
            event_tx: self.event_tx.clone(),
            max_attempts: self.config.max_attempts,
            handler_timeout: self.config.handler_timeout,
            semaphore,
        }
    }
}

/// Lightweight reference bundle for executing a single job in a spawned
/// task.
struct JobRunner {
    client: QueueClient,
    handler: Arc<dyn JobHandler>,
    metrics: Arc<QueueMetrics>,
    event_tx: broadcast::Sender<WorkerEvent>,
    max_attempts: i32,
    handler_timeout: Option<Duration>,
    semaphore: Arc<Semaphore>,
}

impl JobRunner {
    /// Run the handler for one job and reconcile its outcome.
    async fn execute(self, job: Job) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            // Semaphore closed means the loop is gone; leave the job for redelivery
            Err(_) => return,
        };
        let _permit = permit;

        let start = Instant::now();
        let msg_id = job.id;
        let attempt = job.read_count;
        let queue = self.client.queue().to_string();

        info!(queue = %queue, msg_id = %msg_id, read_count = attempt, "Processing job");

        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            queue: queue.clone(),
            msg_id,
            attempt,
        });

        match self.invoke_handler(&job).await {
            Ok(()) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                match self.client.delete(msg_id).await {
                    Ok(_) => {
                        self.metrics.record_processed(duration_ms as f64).await;
                        info!(
                            queue = %queue,
                            msg_id = %msg_id,
                            duration_ms,
                            "Job completed successfully"
                        );
                        let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                            queue,
                            msg_id,
                            duration_ms,
                        });
                    }
                    Err(e) => {
                        // The job will redeliver; handler idempotence covers
                        // the duplicate run.
                        error!(
                            error = %e,
                            queue = %queue,
                            msg_id = %msg_id,
                            "Failed to delete completed job"
                        );
                    }
                }
            }
            Err(handler_error) => {
                self.reconcile_failure(queue, msg_id, attempt, handler_error, start)
                    .await;
            }
        }
    }

    /// Run the handler with panic containment and the optional deadline.
    async fn invoke_handler(&self, job: &Job) -> std::result::Result<(), HandlerError> {
        let contained = async {
            match AssertUnwindSafe(self.handler.handle(job)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::new(
                    FailureKind::Unknown,
                    format!("handler panicked: {}", panic_message(panic.as_ref())),
                )),
            }
        };

        match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, contained).await {
                Ok(result) => result,
                Err(_) => Err(HandlerError::new(
                    FailureKind::Timeout,
                    format!("handler exceeded timeout of {}s", limit.as_secs()),
                )),
            },
            None => contained.await,
        }
    }

    /// Apply the retry classification to a failed job.
    async fn reconcile_failure(
        &self,
        queue: String,
        msg_id: MessageId,
        attempt: i32,
        handler_error: HandlerError,
        start: Instant,
    ) {
        let duration_ms = start.elapsed().as_millis() as u64;

        match classify(&handler_error, attempt, self.max_attempts) {
            RetryDecision::Retry => {
                self.metrics.record_retried();
                warn!(
                    queue = %queue,
                    msg_id = %msg_id,
                    read_count = attempt,
                    error = %handler_error,
                    duration_ms,
                    decision = "retry",
                    "Job failed, leaving for redelivery"
                );
                let _ = self.event_tx.send(WorkerEvent::JobRetried {
                    queue,
                    msg_id,
                    attempt,
                    error: handler_error.to_string(),
                });
            }
            RetryDecision::DeadLetter => match self.client.archive(msg_id).await {
                Ok(_) => {
                    self.metrics.record_failed();
                    info!(
                        queue = %queue,
                        msg_id = %msg_id,
                        read_count = attempt,
                        error = %handler_error,
                        duration_ms,
                        decision = "dead_letter",
                        "Job archived to dead letter storage"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobDeadLettered {
                        queue,
                        msg_id,
                        attempt,
                        error: handler_error.to_string(),
                    });
                }
                Err(e) => {
                    // Archive failed: the message stays claimable and comes
                    // back at the same attempt count.
                    error!(
                        error = %e,
                        queue = %queue,
                        msg_id = %msg_id,
                        "Failed to archive dead-lettered job"
                    );
                }
            },
        }
    }
}

/// Best-effort text from a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.empty_poll_delay_ms, 1_000);
        assert_eq!(config.error_backoff_ms, 5_000);
        assert!(config.handler_timeout.is_none());
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_max_concurrent(8)
            .with_max_attempts(5)
            .with_empty_poll_delay(250)
            .with_error_backoff(100)
            .with_handler_timeout(Some(Duration::from_secs(60)))
            .with_enabled(false);

        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.empty_poll_delay_ms, 250);
        assert_eq!(config.error_backoff_ms, 100);
        assert_eq!(config.handler_timeout, Some(Duration::from_secs(60)));
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_config_with_max_concurrent_preserves_rest() {
        let config = WorkerConfig::default().with_max_concurrent(16);
        assert_eq!(config.max_concurrent, 16);
        assert_eq!(config.max_attempts, 3);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_handler_timeout_clearable() {
        let config = WorkerConfig::default()
            .with_handler_timeout(Some(Duration::from_secs(5)))
            .with_handler_timeout(None);
        assert!(config.handler_timeout.is_none());
    }

    #[test]
    fn test_worker_event_clone() {
        let event = WorkerEvent::JobRetried {
            queue: "transcripts".to_string(),
            msg_id: MessageId(7),
            attempt: 2,
            error: "connection refused".to_string(),
        };

        let cloned = event.clone();
        match cloned {
            WorkerEvent::JobRetried {
                queue,
                msg_id,
                attempt,
                error,
            } => {
                assert_eq!(queue, "transcripts");
                assert_eq!(msg_id, MessageId(7));
                assert_eq!(attempt, 2);
                assert_eq!(error, "connection refused");
            }
            other => panic!("Expected JobRetried, got {:?}", other),
        }
    }

    #[test]
    fn test_panic_message_from_str() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }

    #[test]
    fn test_panic_message_from_string() {
        let payload: Box<dyn Any + Send> = Box::new("index out of range".to_string());
        assert_eq!(panic_message(payload.as_ref()), "index out of range");
    }

    #[test]
    fn test_panic_message_from_opaque_payload() {
        let payload: Box<dyn Any + Send> = Box::new(42_i32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
