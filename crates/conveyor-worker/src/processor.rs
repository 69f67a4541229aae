//! Multi-queue job processor.
//!
//! One processor owns a worker per registered queue plus a single health
//! monitor, so a service can declare its queues up front and run them all
//! under one lifecycle.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use conveyor_core::{Error, QueueConfig, Result};
use conveyor_store::QueueStore;

use crate::client::{Producer, QueueClient};
use crate::handler::JobHandler;
use crate::health::{HealthConfig, HealthMonitor, HealthSink, MonitorHandle, TracingSink};
use crate::metrics::MetricsRegistry;
use crate::worker::{QueueWorker, WorkerConfig, WorkerEvent, WorkerHandle};

struct Registration {
    queue_config: QueueConfig,
    worker_config: WorkerConfig,
    handler: Arc<dyn JobHandler>,
}

/// Builder for a set of queue workers sharing one store, one metrics
/// registry, and one health monitor.
pub struct JobProcessor {
    store: Arc<dyn QueueStore>,
    registry: MetricsRegistry,
    health_config: HealthConfig,
    sink: Arc<dyn HealthSink>,
    registrations: Vec<Registration>,
}

impl JobProcessor {
    /// Create a processor over `store` with default health thresholds and
    /// the tracing sink.
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            registry: MetricsRegistry::new(),
            health_config: HealthConfig::default(),
            sink: Arc::new(TracingSink),
            registrations: Vec::new(),
        }
    }

    /// Set the health monitor configuration.
    pub fn with_health_config(mut self, config: HealthConfig) -> Self {
        self.health_config = config;
        self
    }

    /// Replace the default tracing sink.
    pub fn with_sink(mut self, sink: Arc<dyn HealthSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The registry all workers and producers should share.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    /// A producer bound to this processor's store and registry.
    pub fn producer(&self) -> Producer {
        Producer::new(self.store.clone(), self.registry.clone())
    }

    /// Register a handler for a queue with default worker configuration.
    ///
    /// Each queue takes exactly one handler; a second registration for the
    /// same queue is refused.
    pub fn register<H: JobHandler + 'static>(
        self,
        queue_config: QueueConfig,
        handler: H,
    ) -> Result<Self> {
        self.register_with(queue_config, WorkerConfig::default(), handler)
    }

    /// Register a handler with explicit worker configuration.
    pub fn register_with<H: JobHandler + 'static>(
        mut self,
        queue_config: QueueConfig,
        worker_config: WorkerConfig,
        handler: H,
    ) -> Result<Self> {
        if self
            .registrations
            .iter()
            .any(|r| r.queue_config.queue == queue_config.queue)
        {
            return Err(Error::InvalidInput(format!(
                "handler already registered for queue: {}",
                queue_config.queue
            )));
        }

        self.registrations.push(Registration {
            queue_config,
            worker_config,
            handler: Arc::new(handler),
        });
        Ok(self)
    }

    /// Provision every queue, start one worker per registration and the
    /// health monitor, and return a handle for the whole set.
    pub async fn start(self) -> Result<ProcessorHandle> {
        let mut workers = Vec::with_capacity(self.registrations.len());

        for registration in self.registrations {
            let queue = registration.queue_config.queue.clone();
            let client = QueueClient::new(
                self.store.clone(),
                registration.queue_config,
                &self.registry,
            )
            .await;
            client.ensure_queue().await?;

            let handle = QueueWorker::new(client, registration.handler)
                .with_config(registration.worker_config)
                .start();
            workers.push((queue, handle));
        }

        let monitor = HealthMonitor::new(self.registry.clone(), self.sink)
            .with_config(self.health_config)
            .start();

        info!(queue_count = workers.len(), "Job processor started");

        Ok(ProcessorHandle { workers, monitor })
    }
}

/// Handle over every worker started by a [`JobProcessor`], plus its
/// health monitor.
pub struct ProcessorHandle {
    workers: Vec<(String, WorkerHandle)>,
    monitor: MonitorHandle,
}

impl ProcessorHandle {
    /// Queues with a running worker.
    pub fn queues(&self) -> Vec<&str> {
        self.workers.iter().map(|(queue, _)| queue.as_str()).collect()
    }

    /// Event receiver for one queue's worker.
    pub fn worker_events(&self, queue: &str) -> Option<broadcast::Receiver<WorkerEvent>> {
        self.workers
            .iter()
            .find(|(name, _)| name == queue)
            .map(|(_, handle)| handle.events())
    }

    /// Signal every worker and the monitor to shut down.
    ///
    /// Best-effort: a worker that already stopped does not prevent the
    /// others from being signalled. The first failure is reported.
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_err = None;

        for (queue, handle) in &self.workers {
            if let Err(e) = handle.shutdown().await {
                warn!(queue = %queue, error = %e, "Worker shutdown signal failed");
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = self.monitor.shutdown().await {
            warn!(error = %e, "Health monitor shutdown signal failed");
            first_err.get_or_insert(e);
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use conveyor_store::MemoryStore;

    use crate::handler::NoOpHandler;

    use super::*;

    #[tokio::test]
    async fn test_register_two_queues() {
        let store = Arc::new(MemoryStore::new());
        let processor = JobProcessor::new(store)
            .register(QueueConfig::new("transcripts"), NoOpHandler)
            .unwrap()
            .register(QueueConfig::new("grading"), NoOpHandler)
            .unwrap();

        assert_eq!(processor.registrations.len(), 2);
    }

    #[tokio::test]
    async fn test_register_duplicate_queue_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let result = JobProcessor::new(store)
            .register(QueueConfig::new("transcripts"), NoOpHandler)
            .unwrap()
            .register(QueueConfig::new("transcripts"), NoOpHandler);

        match result {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("transcripts")),
            other => panic!("Expected InvalidInput, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let handle = JobProcessor::new(store)
            .register(QueueConfig::new("transcripts"), NoOpHandler)
            .unwrap()
            .start()
            .await
            .unwrap();

        assert_eq!(handle.queues(), vec!["transcripts"]);
        assert!(handle.worker_events("transcripts").is_some());
        assert!(handle.worker_events("missing").is_none());

        handle.shutdown().await.unwrap();
    }
}
