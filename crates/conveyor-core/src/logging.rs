//! Structured logging schema and field name constants for conveyor.
//!
//! All crates use these field names for consistent structured logging.
//! This ensures log aggregation tools (Loki, Elasticsearch) can query by
//! standardized field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store unreachable, archive/delete failures, handler panics |
//! | WARN  | Job failed and will retry, health transition to unhealthy |
//! | INFO  | Lifecycle events (start, stop), dead-letter archives, recovery |
//! | DEBUG | Batch reads, classification decisions, config choices |
//! | TRACE | Per-message bookkeeping, long-poll iterations |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "store", "client", "worker", "health"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pgmq", "memory", "pool", "worker", "monitor", "producer"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "send", "read", "delete", "archive", "dispatch", "evaluate"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Queue name being operated on.
pub const QUEUE: &str = "queue";

/// Store-assigned message id being processed.
pub const MSG_ID: &str = "msg_id";

/// Delivery count of the message (1 on first read).
pub const READ_COUNT: &str = "read_count";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of messages in a batch (send or read).
pub const MESSAGE_COUNT: &str = "message_count";

/// Queue depth (local gauge or store-reported length).
pub const DEPTH: &str = "depth";

/// Lifetime error rate for a queue (0.0-1.0).
pub const ERROR_RATE: &str = "error_rate";

/// Running average processing time in milliseconds.
pub const AVG_PROCESSING_MS: &str = "avg_processing_ms";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Retry classification outcome ("retry", "dead_letter").
pub const DECISION: &str = "decision";

/// Health verdict for a queue.
pub const HEALTHY: &str = "healthy";
