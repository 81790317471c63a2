//! End-to-end flow: issue an upload, let the worker and reconciler consume
//! their topics, then read the status back.

use async_trait::async_trait;
use chrono::Utc;
use mediaflow_core::{
    CompletionMessage, IdAllocator, MediaKind, ProcessingStatus, QualityTier, StorageBackend,
    VariantReport,
};
use mediaflow_db::test_helpers::InMemoryProcessingRecordRepository;
use mediaflow_processing::{MediaEngine, TranscodingWorker};
use mediaflow_services::{
    CompletionReconciler, CreateUploadRequest, IssuerError, UploadIntentIssuer,
};
use mediaflow_storage::{MemoryStorage, PresignedUpload, Storage, StorageError, StorageResult};
use mediaflow_worker::{ConsumerConfig, ConsumerPool, InMemoryBroker, MessageBroker};
use std::sync::Arc;
use std::time::Duration;

const INGEST: &str = "ingest";
const COMPLETION: &str = "completion";

fn request(kind: MediaKind, file_name: &str) -> CreateUploadRequest {
    CreateUploadRequest {
        owner_id: 7,
        file_name: file_name.into(),
        media_kind: kind,
        byte_size: 1000,
        content_type: None,
        description: Some("quarterly report".into()),
    }
}

fn broker() -> Arc<InMemoryBroker> {
    Arc::new(
        InMemoryBroker::new(4)
            .with_topic(INGEST)
            .with_topic(COMPLETION),
    )
}

#[tokio::test]
async fn completed_job_is_visible_through_status() {
    let repository = InMemoryProcessingRecordRepository::new();
    let ids = Arc::new(IdAllocator::new(Some(3)));
    let issuer = UploadIntentIssuer::new(
        ids.clone(),
        Arc::new(MemoryStorage::new()),
        Arc::new(repository.clone()),
        broker(),
        INGEST,
    );
    let reconciler = CompletionReconciler::new(Arc::new(repository.clone()), ids);

    let intent = issuer.create(request(MediaKind::Image, "a.jpg")).await.unwrap();
    assert_eq!(intent.status, ProcessingStatus::Pending);
    assert!(intent.upload_key.contains('7'));

    let completion = CompletionMessage::completed(
        intent.processing_id,
        intent.upload_key.clone(),
        vec![VariantReport {
            quality_tier: QualityTier::Original,
            storage_key: format!("processed/7/{}/a_original.jpg", intent.processing_id),
            byte_size: 1000,
            width: Some(800),
            height: Some(600),
            duration_seconds: None,
            bitrate_kbps: None,
        }],
        Utc::now(),
    );
    reconciler.reconcile(&completion).await.unwrap();

    let view = issuer.get_status(intent.processing_id).await.unwrap();
    assert_eq!(view.status, ProcessingStatus::Completed);
    assert_eq!(view.variants.len(), 1);
    assert_eq!(view.variants[0].quality_tier, QualityTier::Original);
}

async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

#[tokio::test]
async fn document_flows_through_both_consumer_groups() {
    let repository = InMemoryProcessingRecordRepository::new();
    let storage = MemoryStorage::new();
    let broker = broker();
    let ids = Arc::new(IdAllocator::new(Some(4)));

    let issuer = UploadIntentIssuer::new(
        ids.clone(),
        Arc::new(storage.clone()),
        Arc::new(repository.clone()),
        broker.clone(),
        INGEST,
    );
    let worker = TranscodingWorker::new(
        Arc::new(storage.clone()),
        broker.clone(),
        Arc::new(MediaEngine::default()),
        COMPLETION,
    );
    let reconciler = CompletionReconciler::new(Arc::new(repository.clone()), ids);

    let intent = issuer
        .create(request(MediaKind::Document, "report.pdf"))
        .await
        .unwrap();
    // The client's direct upload.
    storage.insert(intent.upload_key.clone(), b"%PDF-1.7".to_vec());

    let worker_pool = ConsumerPool::start(
        broker.subscribe(INGEST, "transcoding-worker").await.unwrap(),
        Arc::new(worker),
        broker.clone(),
        ConsumerConfig::default(),
    );
    let reconciler_pool = ConsumerPool::start(
        broker.subscribe(COMPLETION, "completion-reconciler").await.unwrap(),
        Arc::new(reconciler),
        broker.clone(),
        ConsumerConfig::default(),
    );

    let processing_id = intent.processing_id;
    eventually(|| {
        repository
            .get(processing_id)
            .is_some_and(|r| r.status.is_terminal())
    })
    .await;

    let view = issuer.get_status(processing_id).await.unwrap();
    assert_eq!(view.status, ProcessingStatus::Completed);
    assert_eq!(view.variants.len(), 1);
    let original = &view.variants[0];
    assert_eq!(
        original.storage_key,
        format!("processed/7/{}/report_original.pdf", processing_id)
    );
    assert_eq!(storage.get(&original.storage_key).unwrap(), b"%PDF-1.7".to_vec());
    assert_eq!(view.original_file_url.as_deref(), Some(original.storage_key.as_str()));

    worker_pool.shutdown().await;
    reconciler_pool.shutdown().await;
}

struct UnavailableStorage;

#[async_trait]
impl Storage for UnavailableStorage {
    async fn presigned_put(
        &self,
        _storage_key: &str,
        _expires_in: Duration,
        _content_type: Option<&str>,
        _content_length: Option<u64>,
    ) -> StorageResult<PresignedUpload> {
        Err(StorageError::BackendError("connection refused".into()))
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        Err(StorageError::NotFound(storage_key.to_string()))
    }

    async fn upload_with_key(
        &self,
        _storage_key: &str,
        _data: Vec<u8>,
        _content_type: &str,
    ) -> StorageResult<String> {
        Err(StorageError::BackendError("connection refused".into()))
    }

    async fn exists(&self, _storage_key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn delete(&self, _storage_key: &str) -> StorageResult<()> {
        Ok(())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}

#[tokio::test]
async fn storage_outage_creates_no_record() {
    let repository = InMemoryProcessingRecordRepository::new();
    let broker = broker();
    let issuer = UploadIntentIssuer::new(
        Arc::new(IdAllocator::new(Some(5))),
        Arc::new(UnavailableStorage),
        Arc::new(repository.clone()),
        broker.clone(),
        INGEST,
    );

    let err = issuer
        .create(request(MediaKind::Video, "clip.mov"))
        .await
        .unwrap_err();

    assert!(matches!(err, IssuerError::StorageUnavailable(_)));
    assert!(err.is_recoverable());
    assert!(repository.is_empty());
    assert!(broker.published(INGEST).is_empty());
}
