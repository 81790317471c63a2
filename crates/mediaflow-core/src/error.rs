//! Error types module
//!
//! Errors raised by the domain layer itself: identifier allocation, message
//! decoding at the broker boundary, and processing-record state transitions.
//! Infrastructure crates (storage, db, broker) define their own error enums.

use crate::models::ProcessingStatus;
use validator::ValidationErrors;

/// Identifier allocation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The wall clock went backwards. No id can be issued safely until it
    /// catches up with the last issued timestamp.
    #[error("Clock moved backwards: last issued at {last_ms} ms, clock now reads {now_ms} ms")]
    ClockRegression { last_ms: i64, now_ms: i64 },

    #[error("Clock reads {now_ms} ms, which is before the id epoch")]
    ClockBeforeEpoch { now_ms: i64 },

    #[error("Timestamp {elapsed_ms} ms since epoch does not fit in 41 bits")]
    TimestampOverflow { elapsed_ms: i64 },
}

impl IdError {
    /// A regressed clock eventually catches up; the other cases do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, IdError::ClockRegression { .. })
    }
}

/// Broker payload decoding errors
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    Invalid(String),
}

impl From<ValidationErrors> for MessageError {
    fn from(err: ValidationErrors) -> Self {
        MessageError::Invalid(err.to_string())
    }
}

/// Rejected processing-record state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Record is already {current}, refusing to move it to {requested}")]
    ConflictingOutcome {
        current: ProcessingStatus,
        requested: ProcessingStatus,
    },

    #[error("A completed record needs at least one variant")]
    EmptyVariants,

    #[error("Record is {current}; it can never return to {requested}")]
    RegressionToPending {
        current: ProcessingStatus,
        requested: ProcessingStatus,
    },
}
