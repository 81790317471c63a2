//! Mediaflow DB Library
//!
//! Persistence for processing records. The pipeline depends only on the
//! [`ProcessingRecordRepository`] contract; [`PgProcessingRecordRepository`]
//! is the PostgreSQL implementation.

pub mod error;
pub mod postgres;
pub mod repository;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use error::RepositoryError;
pub use postgres::{run_migrations, PgProcessingRecordRepository};
pub use repository::ProcessingRecordRepository;
