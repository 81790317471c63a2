//! In-memory repository for testing
//!
//! Mirrors the PostgreSQL repository's contract, including the stored-status
//! check on update, without a database.

use async_trait::async_trait;
use mediaflow_core::ProcessingRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::RepositoryError;
use crate::repository::ProcessingRecordRepository;

/// Processing records kept in a map keyed by source media id.
#[derive(Clone, Default)]
pub struct InMemoryProcessingRecordRepository {
    records: Arc<Mutex<HashMap<i64, ProcessingRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryProcessingRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn insert(&self, record: ProcessingRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.source_media_id, record);
    }

    pub fn get(&self, source_media_id: i64) -> Option<ProcessingRecord> {
        self.records.lock().unwrap().get(&source_media_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessingRecordRepository for InMemoryProcessingRecordRepository {
    async fn create(&self, record: &ProcessingRecord) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&record.source_media_id)
            || records.values().any(|r| r.id == record.id)
        {
            return Err(RepositoryError::Duplicate(format!(
                "source media {}",
                record.source_media_id
            )));
        }
        records.insert(record.source_media_id, record.clone());
        Ok(())
    }

    async fn find_by_source_media_id(
        &self,
        source_media_id: i64,
    ) -> Result<Option<ProcessingRecord>, RepositoryError> {
        self.check_available()?;
        Ok(self.get(source_media_id))
    }

    async fn update(&self, record: &ProcessingRecord) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut records = self.records.lock().unwrap();
        let stored = records
            .get_mut(&record.source_media_id)
            .ok_or(RepositoryError::NotFound(record.source_media_id))?;
        stored.status.check_transition(record.status)?;
        *stored = record.clone();
        Ok(())
    }
}
