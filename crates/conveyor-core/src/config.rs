//! Per-queue configuration.

use std::time::Duration;

use crate::defaults;

/// Configuration for one queue binding.
///
/// Immutable for the lifetime of a client or worker; construct a new value
/// to retune. Two bindings to the same queue name with different configs
/// are legal (e.g. a bulk producer next to a low-latency consumer).
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name as known to the store.
    pub queue: String,
    /// Maximum messages fetched per read.
    pub batch_size: i32,
    /// Long-poll wait before a read returns empty.
    pub poll_timeout: Duration,
    /// Invisibility window for messages handed to this consumer.
    ///
    /// Must comfortably exceed the expected handler runtime; an expired
    /// window hands the in-flight job to a second worker.
    pub visibility_timeout: Duration,
}

impl QueueConfig {
    /// Create a config for `queue` with default tuning.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            batch_size: defaults::QUEUE_BATCH_SIZE,
            poll_timeout: Duration::from_secs(defaults::QUEUE_POLL_TIMEOUT_SECS),
            visibility_timeout: Duration::from_secs(defaults::QUEUE_VISIBILITY_TIMEOUT_SECS),
        }
    }

    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `QUEUE_BATCH_SIZE` | `10` | Max messages per read |
    /// | `QUEUE_POLL_TIMEOUT_SECS` | `30` | Long-poll wait |
    /// | `QUEUE_VISIBILITY_TIMEOUT_SECS` | `30` | Redelivery window |
    pub fn from_env(queue: impl Into<String>) -> Self {
        let batch_size = std::env::var("QUEUE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::QUEUE_BATCH_SIZE)
            .max(1);

        let poll_timeout_secs = std::env::var("QUEUE_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::QUEUE_POLL_TIMEOUT_SECS);

        let visibility_timeout_secs = std::env::var("QUEUE_VISIBILITY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::QUEUE_VISIBILITY_TIMEOUT_SECS);

        Self {
            queue: queue.into(),
            batch_size,
            poll_timeout: Duration::from_secs(poll_timeout_secs),
            visibility_timeout: Duration::from_secs(visibility_timeout_secs),
        }
    }

    /// Set the maximum messages fetched per read.
    pub fn with_batch_size(mut self, batch_size: i32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the long-poll wait.
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Set the visibility timeout.
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::new("transcripts");
        assert_eq!(config.queue, "transcripts");
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_queue_config_with_batch_size() {
        let config = QueueConfig::new("q").with_batch_size(50);
        assert_eq!(config.batch_size, 50);
        // Ensure other defaults preserved
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_queue_config_with_poll_timeout() {
        let config = QueueConfig::new("q").with_poll_timeout(Duration::from_secs(5));
        assert_eq!(config.poll_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_queue_config_with_visibility_timeout() {
        let config = QueueConfig::new("q").with_visibility_timeout(Duration::from_secs(300));
        assert_eq!(config.visibility_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_queue_config_chaining() {
        let config = QueueConfig::new("notifications")
            .with_batch_size(50)
            .with_poll_timeout(Duration::from_secs(5))
            .with_visibility_timeout(Duration::from_secs(60));

        assert_eq!(config.queue, "notifications");
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.poll_timeout, Duration::from_secs(5));
        assert_eq!(config.visibility_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_queue_config_chaining_order_independence() {
        let config1 = QueueConfig::new("q")
            .with_visibility_timeout(Duration::from_secs(120))
            .with_batch_size(5);
        let config2 = QueueConfig::new("q")
            .with_batch_size(5)
            .with_visibility_timeout(Duration::from_secs(120));

        assert_eq!(config1.batch_size, config2.batch_size);
        assert_eq!(config1.visibility_timeout, config2.visibility_timeout);
    }
}
