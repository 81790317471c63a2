//! Transcoding worker
//!
//! Consumes ingestion messages. For each job the worker downloads the source
//! (tolerating upload lag), transcodes every tier concurrently, uploads the
//! tiers that succeeded and publishes exactly one completion message.

use async_trait::async_trait;
use chrono::Utc;
use mediaflow_core::{
    BrokerMessage, CompletionMessage, IngestionMessage, MediaKind, QualityTier, VariantReport,
    WorkerConfig,
};
use mediaflow_storage::keys::processed_key;
use mediaflow_storage::{Storage, StorageError};
use mediaflow_worker::{publish_message, BrokerError, Delivery, HandlerError, MessageBroker, MessageHandler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::engine::{EngineError, TranscodeEngine};
use crate::tiers::{tier_plan, TierSpec};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Source object {storage_key} not available after {attempts} attempts")]
    SourceNotAvailable { storage_key: String, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scratch space error: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("Transcoding {tier} failed: {source}")]
    TierTranscode {
        tier: QualityTier,
        #[source]
        source: EngineError,
    },

    #[error("No quality tier could be produced")]
    NoVariants,

    #[error("Failed to publish completion: {0}")]
    Publish(#[from] BrokerError),
}

/// Retry schedule for sources that are not visible yet.
///
/// Attempt `n` that finds nothing waits `n * step` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step: Duration::from_secs(2),
        }
    }
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.download_max_attempts.max(1),
            step: config.download_retry_step,
        }
    }
}

/// Download `storage_key`, retrying only while the object is not found.
///
/// Any other storage error is returned after the attempt that produced it.
pub async fn download_with_retry(
    storage: &dyn Storage,
    storage_key: &str,
    policy: RetryPolicy,
) -> Result<Vec<u8>, WorkerError> {
    let mut attempt = 1;
    loop {
        match storage.download(storage_key).await {
            Ok(data) => {
                if attempt > 1 {
                    tracing::info!(storage_key = %storage_key, attempt, "Source became available");
                }
                return Ok(data);
            }
            Err(e) if e.is_not_found() => {
                if attempt >= policy.max_attempts {
                    return Err(WorkerError::SourceNotAvailable {
                        storage_key: storage_key.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = policy.delay_after(attempt);
                tracing::info!(
                    storage_key = %storage_key,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    "Source not visible yet, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(storage_key = %storage_key, attempt, error = %e, "Download failed");
                return Err(e.into());
            }
        }
    }
}

/// Key a tier is stored under, e.g. `processed/7/42/clip_high.mp4`.
pub fn derive_variant_key(source_key: &str, tier: QualityTier, extension: Option<&str>) -> String {
    processed_key(source_key, tier.as_str(), extension)
}

fn content_type_for(extension: Option<&str>, fallback: Option<&str>) -> String {
    match extension {
        Some("jpg") => "image/jpeg".to_string(),
        Some("mp4") => "video/mp4".to_string(),
        Some("mp3") => "audio/mpeg".to_string(),
        _ => fallback.unwrap_or("application/octet-stream").to_string(),
    }
}

/// Everything a tier task needs, owned so it can move into the task.
struct TierJob {
    engine: Arc<dyn TranscodeEngine>,
    storage: Arc<dyn Storage>,
    spec: TierSpec,
    kind: MediaKind,
    input: PathBuf,
    output_dir: PathBuf,
    source_key: String,
    content_type: Option<String>,
}

impl TierJob {
    async fn run(self) -> Result<VariantReport, WorkerError> {
        let tier = self.spec.tier;
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(WorkerError::Scratch)?;

        let output = self
            .engine
            .transcode(&self.input, &self.spec, self.kind, &self.output_dir)
            .await
            .map_err(|source| WorkerError::TierTranscode { tier, source })?;

        let data = tokio::fs::read(&output.output_path)
            .await
            .map_err(WorkerError::Scratch)?;
        let byte_size = data.len() as i64;

        let extension = output.extension.as_deref();
        let storage_key = derive_variant_key(&self.source_key, tier, extension);
        let content_type = content_type_for(
            self.spec.output_extension(),
            self.content_type.as_deref(),
        );
        self.storage
            .upload_with_key(&storage_key, data, &content_type)
            .await?;

        tracing::info!(
            tier = %tier,
            storage_key = %storage_key,
            byte_size,
            "Tier stored"
        );

        Ok(VariantReport {
            quality_tier: tier,
            storage_key,
            byte_size,
            width: output.width,
            height: output.height,
            duration_seconds: output.duration_seconds,
            bitrate_kbps: output.bitrate_kbps,
        })
    }
}

pub struct TranscodingWorker {
    storage: Arc<dyn Storage>,
    broker: Arc<dyn MessageBroker>,
    engine: Arc<dyn TranscodeEngine>,
    completion_topic: String,
    retry: RetryPolicy,
}

impl TranscodingWorker {
    pub fn new(
        storage: Arc<dyn Storage>,
        broker: Arc<dyn MessageBroker>,
        engine: Arc<dyn TranscodeEngine>,
        completion_topic: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            broker,
            engine,
            completion_topic: completion_topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one job and publish its completion. Returns the published message.
    ///
    /// Download and transcoding failures become a FAILED completion; only a
    /// failure to publish is returned as an error.
    #[tracing::instrument(skip(self, message), fields(
        correlation_id = message.correlation_id,
        storage_key = %message.storage_key,
        media_kind = %message.media_kind
    ))]
    pub async fn process(&self, message: &IngestionMessage) -> Result<CompletionMessage, WorkerError> {
        let start = std::time::Instant::now();

        let completion = match self.run_job(message).await {
            Ok(variants) => {
                tracing::info!(
                    variant_count = variants.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job completed"
                );
                CompletionMessage::completed(
                    message.correlation_id,
                    message.storage_key.clone(),
                    variants,
                    Utc::now(),
                )
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Job failed"
                );
                CompletionMessage::failed(
                    message.correlation_id,
                    message.storage_key.clone(),
                    e.to_string(),
                    Utc::now(),
                )
            }
        };

        publish_message(self.broker.as_ref(), &self.completion_topic, &completion).await?;
        Ok(completion)
    }

    /// Download, fan out and collect. The scratch directory lives exactly as
    /// long as this call, and every tier task is joined before it returns.
    async fn run_job(&self, message: &IngestionMessage) -> Result<Vec<VariantReport>, WorkerError> {
        let scratch = tempfile::Builder::new()
            .prefix("mediaflow-job-")
            .tempdir()
            .map_err(WorkerError::Scratch)?;

        let data = download_with_retry(self.storage.as_ref(), &message.storage_key, self.retry).await?;
        let input = source_path(scratch.path(), &message.storage_key);
        tokio::fs::write(&input, &data)
            .await
            .map_err(WorkerError::Scratch)?;
        drop(data);

        let mut tasks = JoinSet::new();
        for spec in tier_plan(message.media_kind) {
            let job = TierJob {
                engine: self.engine.clone(),
                storage: self.storage.clone(),
                spec: *spec,
                kind: message.media_kind,
                input: input.clone(),
                output_dir: scratch.path().join(spec.tier.as_str()),
                source_key: message.storage_key.clone(),
                content_type: message.content_type.clone(),
            };
            tasks.spawn(async move { (spec.tier, job.run().await) });
        }

        let mut variants = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(variant))) => variants.push(variant),
                Ok((tier, Err(e))) => {
                    tracing::warn!(tier = %tier, error = %e, "Tier failed, omitting it");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Tier task panicked, omitting it");
                }
            }
        }

        if variants.is_empty() {
            return Err(WorkerError::NoVariants);
        }
        variants.sort_by_key(|v| v.quality_tier);
        Ok(variants)
    }
}

/// Scratch path for the downloaded source, keeping its extension.
fn source_path(scratch: &Path, storage_key: &str) -> PathBuf {
    let extension = Path::new(storage_key)
        .extension()
        .map(|e| e.to_string_lossy().into_owned());
    match extension {
        Some(ext) => scratch.join(format!("source.{}", ext)),
        None => scratch.join("source"),
    }
}

#[async_trait]
impl MessageHandler for TranscodingWorker {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let message = IngestionMessage::decode(&delivery.payload).map_err(|e| {
            tracing::warn!(
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Dropping malformed ingestion message"
            );
            HandlerError::unrecoverable(e)
        })?;

        self.process(&message).await?;
        Ok(())
    }
}
