//! # conveyor-worker
//!
//! Queue processing engine for conveyor.
//!
//! This crate provides:
//! - Typed enqueue clients over any [`conveyor_store::QueueStore`]
//! - Long-polling workers with bounded concurrency
//! - Failure classification into retry or dead-letter outcomes
//! - Per-queue metrics and periodic health evaluation
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use conveyor_core::QueueConfig;
//! use conveyor_store::PgmqStore;
//! use conveyor_worker::{FnHandler, JobProcessor};
//!
//! let store = Arc::new(PgmqStore::from_env().await?);
//!
//! // Declare queues and their handlers
//! let processor = JobProcessor::new(store)
//!     .register(
//!         QueueConfig::new("transcript_processing"),
//!         FnHandler::new(|job| async move {
//!             println!("processing {}", job.id);
//!             Ok(())
//!         }),
//!     )?;
//!
//! // Enqueue from anywhere
//! let producer = processor.producer();
//!
//! // Start everything and get a handle
//! let handle = processor.start().await?;
//! producer.enqueue("transcript_processing", &serde_json::json!({"doc": 7})).await?;
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod client;
pub mod handler;
pub mod health;
pub mod metrics;
pub mod processor;
pub mod worker;

// Re-export core types
pub use conveyor_core::*;

// Re-export the engine surface
pub use client::{EnqueueOptions, Producer, QueueClient};
pub use handler::{FnHandler, JobHandler, NoOpHandler};
pub use health::{HealthConfig, HealthMonitor, HealthSink, MonitorHandle, TracingSink};
pub use metrics::{MetricsRegistry, QueueMetrics};
pub use processor::{JobProcessor, ProcessorHandle};
pub use worker::{QueueWorker, WorkerConfig, WorkerEvent, WorkerHandle};
