//! Centralized default constants for the conveyor engine.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates and embedding applications should reference these constants
//! instead of defining their own magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// QUEUE
// =============================================================================

/// Default maximum messages fetched per long-poll read.
pub const QUEUE_BATCH_SIZE: i32 = 10;

/// Default long-poll wait in seconds before a read returns empty.
pub const QUEUE_POLL_TIMEOUT_SECS: u64 = 30;

/// Default visibility timeout in seconds.
///
/// A message read but neither deleted nor archived becomes redeliverable
/// after this window. It must comfortably exceed the expected handler
/// runtime, otherwise in-flight jobs are handed to a second worker.
pub const QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 30;

/// Internal re-check cadence in milliseconds used while long-polling.
///
/// Matches PGMQ's `read_with_poll` default poll interval; the in-memory
/// store uses the same cadence so its blocking behavior mirrors Postgres.
pub const LONG_POLL_INTERVAL_MS: u64 = 100;

// =============================================================================
// WORKER
// =============================================================================

/// Default maximum concurrently executing handlers per worker.
///
/// Deliberately single-digit: handlers typically fan out to external
/// services, and this cap bounds a worker's outbound pressure.
pub const WORKER_MAX_CONCURRENT: usize = 4;

/// Delay in milliseconds before re-polling after an empty read.
pub const WORKER_EMPTY_POLL_DELAY_MS: u64 = 1_000;

/// Back-off in milliseconds after a failed poll (store unreachable).
///
/// Longer than the empty-queue delay: an unreachable store gains nothing
/// from aggressive retry, and the pause gives transient outages room to
/// clear.
pub const WORKER_ERROR_BACKOFF_MS: u64 = 5_000;

/// Default worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RETRY
// =============================================================================

/// Default maximum delivery attempts before a job is dead-lettered.
///
/// The attempt count is the store's read count, so this caps total
/// deliveries (first attempt included), not just re-deliveries.
pub const MAX_ATTEMPTS: i32 = 3;

// =============================================================================
// HEALTH
// =============================================================================

/// Interval in seconds between health evaluations.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Error-rate threshold above which a queue is reported unhealthy.
///
/// Rate is `failed / (processed + failed)` over the process lifetime;
/// a zero denominator reports healthy rather than dividing.
pub const HEALTH_MAX_ERROR_RATE: f64 = 0.10;

/// Local depth-gauge threshold above which a queue is reported unhealthy.
pub const HEALTH_MAX_QUEUE_DEPTH: i64 = 1_000;

/// Average processing time threshold in milliseconds (30 seconds).
pub const HEALTH_MAX_AVG_PROCESSING_MS: f64 = 30_000.0;
