use mediaflow_core::TransitionError;

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Processing record not found: {0}")]
    NotFound(i64),

    #[error("Failed to decode stored row: {0}")]
    Decode(String),

    #[error("Rejected state change: {0}")]
    Transition(#[from] TransitionError),
}

impl RepositoryError {
    /// Transient failures worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RepositoryError::Database(_))
    }
}
