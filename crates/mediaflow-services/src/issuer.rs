//! Upload intent issuance
//!
//! Opening a job is a fixed sequence: allocate ids, derive the upload key,
//! presign, persist the PENDING record, then publish the ingestion message.
//! Presigning first means a storage outage never leaves a record behind; a
//! broker outage after persisting does leave an orphaned PENDING record.

use chrono::{DateTime, Utc};
use mediaflow_core::{
    IdAllocator, IdError, IngestionMessage, MediaKind, ProcessingRecord, ProcessingStatus,
    ProcessingStatusView,
};
use mediaflow_db::{ProcessingRecordRepository, RepositoryError};
use mediaflow_storage::keys::upload_key;
use mediaflow_storage::{Storage, StorageError};
use mediaflow_worker::{publish_message, BrokerError, MessageBroker};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

const DEFAULT_URL_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to allocate id: {0}")]
    IdAllocation(#[from] IdError),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to queue processing {processing_id}: {source}")]
    QueuePublish {
        processing_id: i64,
        #[source]
        source: BrokerError,
    },

    #[error("Processing {0} not found")]
    NotFound(i64),
}

impl IssuerError {
    /// Whether the caller may retry the same request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            IssuerError::StorageUnavailable(_)
                | IssuerError::Repository(_)
                | IssuerError::QueuePublish { .. }
        )
    }
}

impl From<ValidationErrors> for IssuerError {
    fn from(errors: ValidationErrors) -> Self {
        IssuerError::InvalidRequest(errors.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub owner_id: i64,
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    pub media_kind: MediaKind,
    #[validate(range(min = 1))]
    pub byte_size: i64,
    #[serde(default)]
    #[validate(length(min = 1, max = 255))]
    pub content_type: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

/// What the client needs to upload directly and poll for the outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadIntent {
    pub processing_id: i64,
    pub upload_key: String,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
    pub status: ProcessingStatus,
}

pub struct UploadIntentIssuer {
    ids: Arc<IdAllocator>,
    storage: Arc<dyn Storage>,
    repository: Arc<dyn ProcessingRecordRepository>,
    broker: Arc<dyn MessageBroker>,
    ingest_topic: String,
    url_ttl: Duration,
}

impl UploadIntentIssuer {
    pub fn new(
        ids: Arc<IdAllocator>,
        storage: Arc<dyn Storage>,
        repository: Arc<dyn ProcessingRecordRepository>,
        broker: Arc<dyn MessageBroker>,
        ingest_topic: impl Into<String>,
    ) -> Self {
        Self {
            ids,
            storage,
            repository,
            broker,
            ingest_topic: ingest_topic.into(),
            url_ttl: DEFAULT_URL_TTL,
        }
    }

    pub fn with_url_ttl(mut self, url_ttl: Duration) -> Self {
        self.url_ttl = url_ttl;
        self
    }

    /// Open a processing job and return a presigned upload URL for it.
    #[tracing::instrument(skip(self, request), fields(
        owner_id = request.owner_id,
        media_kind = %request.media_kind,
        processing_id = tracing::field::Empty
    ))]
    pub async fn create(&self, request: CreateUploadRequest) -> Result<UploadIntent, IssuerError> {
        request.validate()?;

        let processing_id = self.ids.generate()?;
        let record_id = self.ids.generate()?;
        tracing::Span::current().record("processing_id", processing_id);

        let key = upload_key(request.owner_id, processing_id, &request.file_name);
        let byte_size = u64::try_from(request.byte_size).ok();

        let presigned = self
            .storage
            .presigned_put(&key, self.url_ttl, request.content_type.as_deref(), byte_size)
            .await
            .map_err(|e| {
                tracing::error!(storage_key = %key, error = %e, "Failed to presign upload");
                IssuerError::StorageUnavailable(e)
            })?;

        let now = Utc::now();
        let record = ProcessingRecord::pending(record_id, processing_id, key.clone(), now);
        self.repository.create(&record).await?;

        let message = IngestionMessage {
            correlation_id: processing_id,
            owner_id: request.owner_id,
            storage_key: key.clone(),
            file_name: request.file_name,
            media_kind: request.media_kind,
            byte_size: request.byte_size,
            content_type: request.content_type,
            description: request.description,
            submitted_at: now,
        };
        publish_message(self.broker.as_ref(), &self.ingest_topic, &message)
            .await
            .map_err(|source| {
                tracing::error!(
                    error = %source,
                    "Ingestion publish failed, record left PENDING"
                );
                IssuerError::QueuePublish {
                    processing_id,
                    source,
                }
            })?;

        tracing::info!(storage_key = %key, "Upload intent issued");

        Ok(UploadIntent {
            processing_id,
            upload_key: key,
            upload_url: presigned.url,
            expires_at: presigned.expires_at,
            status: record.status,
        })
    }

    pub async fn get_status(&self, processing_id: i64) -> Result<ProcessingStatusView, IssuerError> {
        self.repository
            .find_by_source_media_id(processing_id)
            .await?
            .map(ProcessingStatusView::from)
            .ok_or(IssuerError::NotFound(processing_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_db::test_helpers::InMemoryProcessingRecordRepository;
    use mediaflow_storage::MemoryStorage;
    use mediaflow_worker::InMemoryBroker;

    const INGEST: &str = "ingest";

    fn request() -> CreateUploadRequest {
        CreateUploadRequest {
            owner_id: 7,
            file_name: "a.jpg".into(),
            media_kind: MediaKind::Image,
            byte_size: 1000,
            content_type: Some("image/jpeg".into()),
            description: None,
        }
    }

    fn issuer(
        repository: &InMemoryProcessingRecordRepository,
        broker: Arc<InMemoryBroker>,
    ) -> UploadIntentIssuer {
        UploadIntentIssuer::new(
            Arc::new(IdAllocator::new(Some(1))),
            Arc::new(MemoryStorage::new()),
            Arc::new(repository.clone()),
            broker,
            INGEST,
        )
    }

    #[tokio::test]
    async fn invalid_request_has_no_side_effects() {
        let repository = InMemoryProcessingRecordRepository::new();
        let broker = Arc::new(InMemoryBroker::new(1).with_topic(INGEST));
        let issuer = issuer(&repository, broker.clone());

        for bad in [
            CreateUploadRequest {
                byte_size: 0,
                ..request()
            },
            CreateUploadRequest {
                file_name: String::new(),
                ..request()
            },
            CreateUploadRequest {
                description: Some("x".repeat(1001)),
                ..request()
            },
        ] {
            let err = issuer.create(bad).await.unwrap_err();
            assert!(matches!(err, IssuerError::InvalidRequest(_)));
            assert!(!err.is_recoverable());
        }
        assert!(repository.is_empty());
        assert!(broker.published(INGEST).is_empty());
    }

    #[tokio::test]
    async fn create_publishes_keyed_by_processing_id() {
        let repository = InMemoryProcessingRecordRepository::new();
        let broker = Arc::new(InMemoryBroker::new(4).with_topic(INGEST));
        let issuer = issuer(&repository, broker.clone());

        let intent = issuer.create(request()).await.unwrap();

        assert_eq!(intent.status, ProcessingStatus::Pending);
        assert_eq!(
            intent.upload_key,
            format!("uploads/7/{}/a.jpg", intent.processing_id)
        );
        assert!(intent.expires_at > Utc::now());

        let published = broker.published(INGEST);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, intent.processing_id.to_string());

        let record = repository.get(intent.processing_id).unwrap();
        assert_ne!(record.id, intent.processing_id);
        assert_eq!(record.upload_key, intent.upload_key);
    }

    #[tokio::test]
    async fn unknown_processing_id_is_not_found() {
        let repository = InMemoryProcessingRecordRepository::new();
        let broker = Arc::new(InMemoryBroker::new(1).with_topic(INGEST));
        let issuer = issuer(&repository, broker);

        assert!(matches!(
            issuer.get_status(12345).await,
            Err(IssuerError::NotFound(12345))
        ));
    }

    #[tokio::test]
    async fn repository_outage_is_recoverable_and_unpublished() {
        let repository = InMemoryProcessingRecordRepository::new();
        repository.set_unavailable(true);
        let broker = Arc::new(InMemoryBroker::new(1).with_topic(INGEST));
        let issuer = issuer(&repository, broker.clone());

        let err = issuer.create(request()).await.unwrap_err();
        assert!(matches!(err, IssuerError::Repository(_)));
        assert!(err.is_recoverable());
        assert!(broker.published(INGEST).is_empty());
    }

    #[tokio::test]
    async fn publish_failure_leaves_pending_record() {
        let repository = InMemoryProcessingRecordRepository::new();
        // No ingest topic declared: every publish fails.
        let broker = Arc::new(InMemoryBroker::new(1));
        let issuer = issuer(&repository, broker);

        let err = issuer.create(request()).await.unwrap_err();
        let processing_id = match err {
            IssuerError::QueuePublish { processing_id, .. } => processing_id,
            other => panic!("expected QueuePublish, got {:?}", other),
        };

        let orphan = repository.get(processing_id).unwrap();
        assert_eq!(orphan.status, ProcessingStatus::Pending);
        let view = issuer.get_status(processing_id).await.unwrap();
        assert_eq!(view.status, ProcessingStatus::Pending);
    }
}
