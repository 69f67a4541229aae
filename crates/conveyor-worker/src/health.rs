//! Periodic queue health evaluation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use conveyor_core::{defaults, Error, HealthStatus, MetricsSnapshot, Result};

use crate::metrics::MetricsRegistry;

/// Thresholds for declaring a queue unhealthy.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// How often queues are evaluated.
    pub check_interval: Duration,
    /// Lifetime error rate above which a queue is unhealthy.
    pub max_error_rate: f64,
    /// Local depth gauge above which a queue is unhealthy.
    pub max_queue_depth: i64,
    /// Running average processing time above which a queue is unhealthy.
    pub max_avg_processing_ms: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(defaults::HEALTH_CHECK_INTERVAL_SECS),
            max_error_rate: defaults::HEALTH_MAX_ERROR_RATE,
            max_queue_depth: defaults::HEALTH_MAX_QUEUE_DEPTH,
            max_avg_processing_ms: defaults::HEALTH_MAX_AVG_PROCESSING_MS,
        }
    }
}

impl HealthConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `HEALTH_CHECK_INTERVAL_SECS` | `30` | Evaluation period |
    /// | `HEALTH_MAX_ERROR_RATE` | `0.1` | Error-rate threshold (0.0-1.0) |
    /// | `HEALTH_MAX_QUEUE_DEPTH` | `1000` | Depth threshold |
    /// | `HEALTH_MAX_AVG_PROCESSING_MS` | `30000` | Processing-time threshold |
    pub fn from_env() -> Self {
        let check_interval = std::env::var("HEALTH_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(defaults::HEALTH_CHECK_INTERVAL_SECS));

        let max_error_rate = std::env::var("HEALTH_MAX_ERROR_RATE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults::HEALTH_MAX_ERROR_RATE);

        let max_queue_depth = std::env::var("HEALTH_MAX_QUEUE_DEPTH")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::HEALTH_MAX_QUEUE_DEPTH);

        let max_avg_processing_ms = std::env::var("HEALTH_MAX_AVG_PROCESSING_MS")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults::HEALTH_MAX_AVG_PROCESSING_MS);

        Self {
            check_interval,
            max_error_rate,
            max_queue_depth,
            max_avg_processing_ms,
        }
    }

    /// Set the evaluation period.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set the error-rate threshold.
    pub fn with_max_error_rate(mut self, rate: f64) -> Self {
        self.max_error_rate = rate;
        self
    }

    /// Set the depth threshold.
    pub fn with_max_queue_depth(mut self, depth: i64) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the processing-time threshold.
    pub fn with_max_avg_processing_ms(mut self, ms: f64) -> Self {
        self.max_avg_processing_ms = ms;
        self
    }
}

/// Receiver for health evaluations.
///
/// `on_health_change` fires only on healthy/unhealthy transitions, so a
/// queue that stays degraded for an hour produces one notification, not
/// one per tick.
#[async_trait]
pub trait HealthSink: Send + Sync {
    /// Called once per transition between healthy and unhealthy.
    async fn on_health_change(&self, queue: &str, status: &HealthStatus);

    /// Called every tick for every known queue.
    async fn on_metrics_snapshot(&self, queue: &str, snapshot: &MetricsSnapshot);
}

/// Default sink that reports through tracing.
pub struct TracingSink;

#[async_trait]
impl HealthSink for TracingSink {
    async fn on_health_change(&self, queue: &str, status: &HealthStatus) {
        if status.healthy {
            info!(queue, healthy = true, "Queue recovered");
        } else {
            warn!(
                queue,
                healthy = false,
                issues = ?status.issues,
                "Queue unhealthy"
            );
        }
    }

    async fn on_metrics_snapshot(&self, queue: &str, snapshot: &MetricsSnapshot) {
        debug!(
            queue,
            depth = snapshot.current_depth,
            error_rate = snapshot.error_rate(),
            avg_processing_ms = snapshot.avg_processing_ms,
            "Queue metrics snapshot"
        );
    }
}

/// Handle for controlling a running monitor.
pub struct MonitorHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl MonitorHandle {
    /// Signal the monitor to shut down.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }
}

/// Periodic evaluator of every queue's local metrics.
///
/// Escalation is the sink's problem; the monitor only decides healthy or
/// not and keeps the per-queue edge state so sinks are not spammed.
pub struct HealthMonitor {
    registry: MetricsRegistry,
    config: HealthConfig,
    sink: std::sync::Arc<dyn HealthSink>,
    previously_healthy: RwLock<HashMap<String, bool>>,
}

impl HealthMonitor {
    /// Create a monitor with default thresholds.
    pub fn new(registry: MetricsRegistry, sink: std::sync::Arc<dyn HealthSink>) -> Self {
        Self {
            registry,
            config: HealthConfig::default(),
            sink,
            previously_healthy: RwLock::new(HashMap::new()),
        }
    }

    /// Set the monitor configuration.
    pub fn with_config(mut self, config: HealthConfig) -> Self {
        self.config = config;
        self
    }

    /// Judge one snapshot against the thresholds. Pure.
    ///
    /// A queue with no finished jobs yet has an error rate of zero, so an
    /// idle queue is healthy rather than undefined.
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> HealthStatus {
        let mut issues = Vec::new();

        let error_rate = snapshot.error_rate();
        if error_rate > self.config.max_error_rate {
            issues.push(format!(
                "high error rate: {:.1}% of jobs failing",
                error_rate * 100.0
            ));
        }

        if snapshot.current_depth > self.config.max_queue_depth {
            issues.push(format!(
                "high queue depth: {} jobs waiting",
                snapshot.current_depth
            ));
        }

        if snapshot.avg_processing_ms > self.config.max_avg_processing_ms {
            issues.push(format!(
                "slow processing: {:.0}ms average",
                snapshot.avg_processing_ms
            ));
        }

        HealthStatus {
            healthy: issues.is_empty(),
            issues,
            last_check: Utc::now(),
        }
    }

    /// One evaluation pass over every known queue.
    pub async fn run_once(&self) {
        for (queue, snapshot) in self.registry.snapshot_all().await {
            self.sink.on_metrics_snapshot(&queue, &snapshot).await;

            let status = self.evaluate(&snapshot);
            let changed = {
                let mut previous = self.previously_healthy.write().await;
                let was_healthy = previous
                    .insert(queue.clone(), status.healthy)
                    .unwrap_or(true);
                was_healthy != status.healthy
            };

            if changed {
                self.sink.on_health_change(&queue, &status).await;
            }
        }
    }

    /// Start the monitor and return a handle for control.
    pub fn start(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            info!(
                check_interval_secs = self.config.check_interval.as_secs(),
                "Health monitor started"
            );

            let mut ticker = tokio::time::interval(self.config.check_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Health monitor received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                }
            }

            info!("Health monitor stopped");
        });

        MonitorHandle { shutdown_tx }
    }
}
