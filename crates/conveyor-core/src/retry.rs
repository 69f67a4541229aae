//! Retry classification for failed jobs.
//!
//! A pure decision layer: given what failed and how many deliveries the job
//! has consumed, decide between waiting for redelivery and dead-lettering.
//! No I/O and no knowledge of queues or handlers, so the policy is testable
//! in isolation and identical across every worker.

use thiserror::Error;

use crate::defaults;

/// Failure taxonomy for handler errors.
///
/// Handlers that know why they failed should tag the right variant;
/// [`FailureKind::from_message`] exists as a compatibility adapter for
/// errors that arrive as bare strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Operation exceeded a deadline (retryable).
    Timeout,
    /// Connection to a dependency failed or dropped (retryable).
    Connection,
    /// Network-level failure, DNS, routing (retryable).
    Network,
    /// Dependency throttled the caller (retryable).
    RateLimited,
    /// Dependency reported itself temporarily down (retryable).
    Unavailable,
    /// Referenced entity does not exist (non-retryable).
    NotFound,
    /// Caller lacks permission (non-retryable).
    AccessDenied,
    /// Payload or input is malformed (non-retryable).
    InvalidInput,
    /// Source data is damaged (non-retryable).
    Corrupted,
    /// Input type/format is not handled (non-retryable).
    Unsupported,
    /// Unclassified failure; treated as retryable.
    Unknown,
}

impl FailureKind {
    /// Whether redelivery could plausibly succeed.
    ///
    /// `Unknown` is retryable: transient faults are more common than
    /// permanent ones in practice, and the attempt cap bounds the damage
    /// of guessing wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureKind::Timeout => true,
            FailureKind::Connection => true,
            FailureKind::Network => true,
            FailureKind::RateLimited => true,
            FailureKind::Unavailable => true,
            FailureKind::NotFound => false,
            FailureKind::AccessDenied => false,
            FailureKind::InvalidInput => false,
            FailureKind::Corrupted => false,
            FailureKind::Unsupported => false,
            FailureKind::Unknown => true,
        }
    }

    /// Infer a kind from an untagged error message.
    ///
    /// Case-insensitive substring scan. Permanent patterns are checked
    /// first, so a message matching both classes dead-letters.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();

        if msg.contains("not found") {
            return FailureKind::NotFound;
        }
        if msg.contains("access denied") {
            return FailureKind::AccessDenied;
        }
        if msg.contains("invalid format") {
            return FailureKind::InvalidInput;
        }
        if msg.contains("corrupted") {
            return FailureKind::Corrupted;
        }
        if msg.contains("unsupported type") {
            return FailureKind::Unsupported;
        }

        if msg.contains("timeout") {
            return FailureKind::Timeout;
        }
        if msg.contains("connection") {
            return FailureKind::Connection;
        }
        if msg.contains("network") {
            return FailureKind::Network;
        }
        if msg.contains("rate limit") {
            return FailureKind::RateLimited;
        }
        if msg.contains("temporarily unavailable") || msg.contains("service unavailable") {
            return FailureKind::Unavailable;
        }

        FailureKind::Unknown
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Connection => "connection",
            FailureKind::Network => "network",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Unavailable => "unavailable",
            FailureKind::NotFound => "not_found",
            FailureKind::AccessDenied => "access_denied",
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::Corrupted => "corrupted",
            FailureKind::Unsupported => "unsupported",
            FailureKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Error returned by a job handler.
///
/// This is the whole contract between a handler and the worker loop: a
/// kind for the classifier and a message for the logs. Handler errors are
/// absorbed into retry/dead-letter decisions, never propagated.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub kind: FailureKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from a bare message, inferring the kind from its text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::from_message(&message),
            message,
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(e: anyhow::Error) -> Self {
        // Alternate format keeps the cause chain visible to the pattern scan.
        HandlerError::from_message(format!("{:#}", e))
    }
}

/// Outcome of classifying a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Leave the message in place; the visibility timeout redelivers it.
    Retry,
    /// Archive the message for offline inspection.
    DeadLetter,
}

/// Decide what to do with a failed delivery.
///
/// `attempt` is the store's read count for the message, so the first
/// delivery is attempt 1. The attempt cap wins over every error kind:
/// even a retryable failure dead-letters once `attempt >= max_attempts`.
pub fn classify(error: &HandlerError, attempt: i32, max_attempts: i32) -> RetryDecision {
    if attempt >= max_attempts {
        return RetryDecision::DeadLetter;
    }

    let kind = match error.kind {
        FailureKind::Unknown => FailureKind::from_message(&error.message),
        kind => kind,
    };

    if kind.is_retryable() {
        RetryDecision::Retry
    } else {
        RetryDecision::DeadLetter
    }
}

/// [`classify`] with the default attempt cap.
pub fn classify_default(error: &HandlerError, attempt: i32) -> RetryDecision {
    classify(error, attempt, defaults::MAX_ATTEMPTS)
}
