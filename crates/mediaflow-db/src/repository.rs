use async_trait::async_trait;
use mediaflow_core::ProcessingRecord;

use crate::error::RepositoryError;

/// Store for processing records and their variants.
#[async_trait]
pub trait ProcessingRecordRepository: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` if the id or source media
    /// id is taken.
    async fn create(&self, record: &ProcessingRecord) -> Result<(), RepositoryError>;

    /// Look up a record, with its variants in tier order.
    async fn find_by_source_media_id(
        &self,
        source_media_id: i64,
    ) -> Result<Option<ProcessingRecord>, RepositoryError>;

    /// Persist the record's status, outcome fields and variant set.
    ///
    /// Implementations re-check the stored status so a terminal record can
    /// never be overwritten with a different outcome or moved back to pending.
    async fn update(&self, record: &ProcessingRecord) -> Result<(), RepositoryError>;
}
