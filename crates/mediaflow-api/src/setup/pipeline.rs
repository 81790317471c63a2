//! Broker, transcoding worker and completion reconciler wiring.

use anyhow::Result;
use mediaflow_core::{Config, IdAllocator};
use mediaflow_db::ProcessingRecordRepository;
use mediaflow_processing::{FfmpegEngine, MediaEngine, RetryPolicy, TranscodingWorker};
use mediaflow_services::CompletionReconciler;
use mediaflow_storage::Storage;
use mediaflow_worker::{ConsumerConfig, ConsumerPool, InMemoryBroker, MessageBroker};
use std::sync::Arc;

/// Running consumer groups and the broker they read from.
pub struct Pipeline {
    broker: Arc<InMemoryBroker>,
    worker: ConsumerPool,
    reconciler: ConsumerPool,
}

impl Pipeline {
    pub fn broker(&self) -> Arc<dyn MessageBroker> {
        self.broker.clone()
    }

    /// Stop both consumer groups, letting in-flight jobs finish.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
        self.reconciler.shutdown().await;
        self.broker.close();
    }
}

pub async fn start_pipeline(
    config: &Config,
    storage: Arc<dyn Storage>,
    repository: Arc<dyn ProcessingRecordRepository>,
    ids: Arc<IdAllocator>,
) -> Result<Pipeline> {
    let settings = &config.broker;

    let broker = Arc::new(
        InMemoryBroker::new(settings.partitions)
            .with_backlog_limit(settings.backlog_limit)
            .with_topic(&settings.ingest_topic)
            .with_topic(&settings.completion_topic),
    );
    if let Some(topic) = &settings.dead_letter_topic {
        broker.create_topic(topic);
    }

    let consumer_config = ConsumerConfig {
        max_attempts: settings.handler_max_attempts.max(1),
        dead_letter_topic: settings.dead_letter_topic.clone(),
        ..ConsumerConfig::default()
    };

    let engine = MediaEngine::new(FfmpegEngine::new(
        config.worker.ffmpeg_path.clone(),
        config.worker.ffprobe_path.clone(),
    ));
    let worker = TranscodingWorker::new(
        storage,
        broker.clone(),
        Arc::new(engine),
        settings.completion_topic.clone(),
    )
    .with_retry_policy(RetryPolicy::from(&config.worker));

    let worker = ConsumerPool::start(
        broker.subscribe(&settings.ingest_topic, &settings.worker_group).await?,
        Arc::new(worker),
        broker.clone(),
        consumer_config.clone(),
    );

    let reconciler = ConsumerPool::start(
        broker
            .subscribe(&settings.completion_topic, &settings.reconciler_group)
            .await?,
        Arc::new(CompletionReconciler::new(repository, ids)),
        broker.clone(),
        consumer_config,
    );

    tracing::info!(
        partitions = broker.partitions(),
        ingest_topic = %settings.ingest_topic,
        completion_topic = %settings.completion_topic,
        "Processing pipeline started"
    );

    Ok(Pipeline {
        broker,
        worker,
        reconciler,
    })
}
