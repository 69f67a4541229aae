//! # conveyor-core
//!
//! Core types, retry policy, and abstractions for the conveyor job-queue
//! engine.
//!
//! This crate provides the foundational data structures and decision logic
//! that the store and worker crates depend on.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod retry;

// Re-export commonly used types at crate root
pub use config::QueueConfig;
pub use error::{Error, Result};
pub use models::{HealthStatus, Job, MessageId, MetricsSnapshot, StoreMetrics};
pub use retry::{classify, classify_default, FailureKind, HandlerError, RetryDecision};
