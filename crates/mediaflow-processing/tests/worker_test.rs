//! Transcoding worker behaviour against in-memory storage and broker.

use async_trait::async_trait;
use chrono::Utc;
use mediaflow_core::{
    BrokerMessage, CompletionMessage, CompletionOutcome, IngestionMessage, MediaKind, QualityTier,
    StorageBackend,
};
use mediaflow_processing::{
    download_with_retry, EngineError, RetryPolicy, TierSpec, TranscodeEngine, TranscodeOutput,
    TranscodingWorker, WorkerError,
};
use mediaflow_storage::{MemoryStorage, PresignedUpload, Storage, StorageError, StorageResult};
use mediaflow_worker::{Delivery, InMemoryBroker, MessageHandler};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SOURCE_KEY: &str = "uploads/7/42/photo.png";
const COMPLETION_TOPIC: &str = "completion";

/// Storage whose downloads fail a scripted number of times first.
struct FlakyStorage {
    inner: MemoryStorage,
    not_found_remaining: AtomicU32,
    backend_failure: bool,
    attempts: AtomicU32,
}

impl FlakyStorage {
    fn new(inner: MemoryStorage, not_found: u32) -> Self {
        Self {
            inner,
            not_found_remaining: AtomicU32::new(not_found),
            backend_failure: false,
            attempts: AtomicU32::new(0),
        }
    }

    fn broken(inner: MemoryStorage) -> Self {
        Self {
            backend_failure: true,
            ..Self::new(inner, 0)
        }
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for FlakyStorage {
    async fn presigned_put(
        &self,
        storage_key: &str,
        expires_in: Duration,
        content_type: Option<&str>,
        content_length: Option<u64>,
    ) -> StorageResult<PresignedUpload> {
        self.inner
            .presigned_put(storage_key, expires_in, content_type, content_length)
            .await
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.backend_failure {
            return Err(StorageError::BackendError("access denied".into()));
        }
        let remaining = self.not_found_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.not_found_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::NotFound(storage_key.to_string()));
        }
        self.inner.download(storage_key).await
    }

    async fn upload_with_key(
        &self,
        storage_key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<String> {
        self.inner.upload_with_key(storage_key, data, content_type).await
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        self.inner.exists(storage_key).await
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        self.inner.delete(storage_key).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[derive(Clone, Copy)]
enum Failure {
    Error,
    Panic,
}

/// Writes a small marker file per tier; selected tiers fail.
#[derive(Default)]
struct FakeEngine {
    failures: HashMap<QualityTier, Failure>,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeEngine {
    fn failing(tier: QualityTier, failure: Failure) -> Self {
        Self {
            failures: HashMap::from([(tier, failure)]),
            ..Self::default()
        }
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    async fn transcode(
        &self,
        input: &Path,
        spec: &TierSpec,
        _kind: MediaKind,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, EngineError> {
        self.inputs.lock().unwrap().push(input.to_path_buf());
        match self.failures.get(&spec.tier) {
            Some(Failure::Error) => {
                return Err(EngineError::CommandFailed {
                    program: "fake".into(),
                    stderr: "corrupt stream".into(),
                })
            }
            Some(Failure::Panic) => panic!("engine crashed on {}", spec.tier),
            None => {}
        }

        let extension = spec
            .output_extension()
            .map(str::to_string)
            .or_else(|| input.extension().map(|e| e.to_string_lossy().into_owned()));
        let mut path = output_dir.join(spec.tier.as_str());
        if let Some(ext) = &extension {
            path.set_extension(ext);
        }
        tokio::fs::write(&path, format!("tier-{}", spec.tier)).await?;

        let mut output = TranscodeOutput::new(path);
        output.width = Some(640);
        output.height = Some(480);
        Ok(output)
    }
}

fn ingestion(kind: MediaKind, storage_key: &str) -> IngestionMessage {
    IngestionMessage {
        correlation_id: 42,
        owner_id: 7,
        storage_key: storage_key.to_string(),
        file_name: "photo.png".into(),
        media_kind: kind,
        byte_size: 5,
        content_type: Some("image/png".into()),
        description: None,
        submitted_at: Utc::now(),
    }
}

struct Harness {
    memory: MemoryStorage,
    storage: Arc<FlakyStorage>,
    broker: Arc<InMemoryBroker>,
    engine: Arc<FakeEngine>,
    worker: TranscodingWorker,
}

fn harness(storage: FlakyStorage, memory: MemoryStorage, engine: FakeEngine) -> Harness {
    let storage = Arc::new(storage);
    let broker = Arc::new(InMemoryBroker::new(2).with_topic(COMPLETION_TOPIC));
    let engine = Arc::new(engine);
    let worker = TranscodingWorker::new(
        storage.clone(),
        broker.clone(),
        engine.clone(),
        COMPLETION_TOPIC,
    );
    Harness {
        memory,
        storage,
        broker,
        engine,
        worker,
    }
}

fn with_source() -> MemoryStorage {
    let memory = MemoryStorage::new();
    memory.insert(SOURCE_KEY, b"image".to_vec());
    memory
}

fn published(broker: &InMemoryBroker) -> Vec<CompletionMessage> {
    broker
        .published(COMPLETION_TOPIC)
        .iter()
        .map(|d| CompletionMessage::decode(&d.payload).unwrap())
        .collect()
}

fn variant_tiers(message: &CompletionMessage) -> Vec<QualityTier> {
    match &message.outcome {
        CompletionOutcome::Completed { variants } => {
            variants.iter().map(|v| v.quality_tier).collect()
        }
        CompletionOutcome::Failed { error } => panic!("job failed: {}", error),
    }
}

#[tokio::test(start_paused = true)]
async fn download_waits_for_late_upload() {
    let memory = with_source();
    let storage = FlakyStorage::new(memory, 4);

    let start = tokio::time::Instant::now();
    let data = download_with_retry(&storage, SOURCE_KEY, RetryPolicy::default())
        .await
        .unwrap();
    let waited = start.elapsed();

    assert_eq!(data, b"image".to_vec());
    assert_eq!(storage.attempts(), 5);
    assert!(waited >= Duration::from_secs(20), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(21), "waited {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn missing_source_fails_after_five_attempts() {
    let memory = MemoryStorage::new();
    let h = harness(FlakyStorage::new(memory.clone(), u32::MAX), memory, FakeEngine::default());

    let start = tokio::time::Instant::now();
    let completion = h.worker.process(&ingestion(MediaKind::Image, SOURCE_KEY)).await.unwrap();

    assert_eq!(h.storage.attempts(), 5);
    // No sleep after the last attempt.
    assert!(start.elapsed() < Duration::from_secs(21));
    assert!(matches!(
        &completion.outcome,
        CompletionOutcome::Failed { error } if error.contains("not available after 5 attempts")
    ));
    assert_eq!(published(&h.broker), vec![completion]);
}

#[tokio::test]
async fn other_storage_errors_are_not_retried() {
    let memory = with_source();
    let storage = FlakyStorage::broken(memory);

    let result = download_with_retry(&storage, SOURCE_KEY, RetryPolicy::default()).await;

    assert!(matches!(result, Err(WorkerError::Storage(_))));
    assert_eq!(storage.attempts(), 1);
}

#[tokio::test]
async fn image_job_publishes_every_tier() {
    let memory = with_source();
    let h = harness(FlakyStorage::new(memory.clone(), 0), memory, FakeEngine::default());

    let completion = h.worker.process(&ingestion(MediaKind::Image, SOURCE_KEY)).await.unwrap();

    assert_eq!(variant_tiers(&completion), QualityTier::ALL.to_vec());
    assert_eq!(completion.correlation_id, 42);
    assert_eq!(completion.storage_key, SOURCE_KEY);
    for key in [
        "processed/7/42/photo_original.png",
        "processed/7/42/photo_high.jpg",
        "processed/7/42/photo_medium.jpg",
        "processed/7/42/photo_low.jpg",
    ] {
        assert!(h.memory.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(
        h.memory.get("processed/7/42/photo_low.jpg").unwrap(),
        b"tier-low".to_vec()
    );

    let published = h.broker.published(COMPLETION_TOPIC);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, "42");
}

#[tokio::test]
async fn failing_tier_is_omitted() {
    let memory = with_source();
    let h = harness(
        FlakyStorage::new(memory.clone(), 0),
        memory,
        FakeEngine::failing(QualityTier::High, Failure::Error),
    );

    let completion = h.worker.process(&ingestion(MediaKind::Image, SOURCE_KEY)).await.unwrap();

    assert_eq!(
        variant_tiers(&completion),
        vec![QualityTier::Original, QualityTier::Medium, QualityTier::Low]
    );
    assert!(h.memory.get("processed/7/42/photo_high.jpg").is_none());
}

#[tokio::test]
async fn panicking_tier_is_omitted() {
    let memory = with_source();
    let h = harness(
        FlakyStorage::new(memory.clone(), 0),
        memory,
        FakeEngine::failing(QualityTier::Low, Failure::Panic),
    );

    let completion = h.worker.process(&ingestion(MediaKind::Image, SOURCE_KEY)).await.unwrap();

    assert_eq!(
        variant_tiers(&completion),
        vec![QualityTier::Original, QualityTier::High, QualityTier::Medium]
    );
}

#[tokio::test]
async fn document_yields_only_the_original() {
    let key = "uploads/7/42/report.pdf";
    let memory = MemoryStorage::new();
    memory.insert(key, b"%PDF".to_vec());
    let h = harness(FlakyStorage::new(memory.clone(), 0), memory, FakeEngine::default());

    let mut message = ingestion(MediaKind::Document, key);
    message.content_type = Some("application/pdf".into());
    let completion = h.worker.process(&message).await.unwrap();

    let CompletionOutcome::Completed { variants } = &completion.outcome else {
        panic!("expected COMPLETED");
    };
    assert_eq!(variants.len(), 1);
    assert_eq!(variants[0].quality_tier, QualityTier::Original);
    assert_eq!(variants[0].storage_key, "processed/7/42/report_original.pdf");
    assert_eq!(variants[0].byte_size, "tier-original".len() as i64);
}

#[tokio::test]
async fn all_tiers_failing_publishes_failed() {
    let key = "uploads/7/42/report.pdf";
    let memory = MemoryStorage::new();
    memory.insert(key, b"%PDF".to_vec());
    let h = harness(
        FlakyStorage::new(memory.clone(), 0),
        memory,
        FakeEngine::failing(QualityTier::Original, Failure::Error),
    );

    let completion = h.worker.process(&ingestion(MediaKind::Document, key)).await.unwrap();

    assert!(matches!(completion.outcome, CompletionOutcome::Failed { .. }));
    assert_eq!(published(&h.broker).len(), 1);
}

#[tokio::test]
async fn scratch_space_is_removed_after_the_job() {
    let memory = with_source();
    let h = harness(
        FlakyStorage::new(memory.clone(), 0),
        memory,
        FakeEngine::failing(QualityTier::Medium, Failure::Error),
    );

    h.worker.process(&ingestion(MediaKind::Image, SOURCE_KEY)).await.unwrap();

    let inputs = h.engine.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 4);
    for input in inputs {
        let scratch = input.parent().unwrap();
        assert!(!scratch.exists(), "{} was left behind", scratch.display());
    }
}

#[tokio::test]
async fn malformed_delivery_is_rejected_without_publishing() {
    let memory = with_source();
    let h = harness(FlakyStorage::new(memory.clone(), 0), memory, FakeEngine::default());

    let delivery = Delivery {
        topic: "ingest".into(),
        partition: 0,
        offset: 0,
        key: "42".into(),
        payload: b"{\"correlationId\": \"nope\"}".to_vec(),
    };
    assert!(h.worker.handle(&delivery).await.is_err());
    assert!(h.broker.published(COMPLETION_TOPIC).is_empty());

    let valid = Delivery {
        payload: ingestion(MediaKind::Image, SOURCE_KEY).encode().unwrap(),
        ..delivery
    };
    h.worker.handle(&valid).await.unwrap();
    assert_eq!(published(&h.broker).len(), 1);
}
