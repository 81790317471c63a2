//! Application setup and initialization

pub mod database;
pub mod pipeline;
pub mod server;

use anyhow::{Context, Result};
use axum::Router;
use mediaflow_core::{Config, IdAllocator};
use mediaflow_db::PgProcessingRecordRepository;
use mediaflow_infra::LogFormat;
use mediaflow_services::UploadIntentIssuer;
use mediaflow_storage::create_storage;
use std::sync::Arc;

use crate::routes::build_router;
use crate::state::AppState;
use pipeline::Pipeline;

/// A wired application: HTTP router plus the background consumers.
pub struct Application {
    pub router: Router,
    pub pipeline: Pipeline,
}

/// Initialize the entire application
pub async fn initialize_app(config: &Config) -> Result<Application> {
    // Fail fast on misconfiguration
    config.validate().context("Configuration validation failed")?;

    let log_format: LogFormat = config.base.log_format.parse()?;
    mediaflow_infra::init_telemetry(log_format, &config.base.environment)
        .context("Failed to initialize telemetry")?;

    tracing::info!("Configuration loaded and validated successfully");

    let pool = database::setup_database(config).await?;
    let repository = Arc::new(PgProcessingRecordRepository::new(pool));

    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage")?;
    tracing::info!(backend = %storage.backend_type(), "Storage initialized");

    let ids = Arc::new(IdAllocator::new(config.id_instance_id));
    tracing::info!(instance_id = ids.instance_id(), "Id allocator ready");

    let pipeline = pipeline::start_pipeline(config, storage.clone(), repository.clone(), ids.clone())
        .await
        .context("Failed to start processing pipeline")?;

    let issuer = UploadIntentIssuer::new(
        ids,
        storage,
        repository,
        pipeline.broker(),
        config.broker.ingest_topic.clone(),
    )
    .with_url_ttl(config.storage.upload_url_ttl);

    let router = build_router(AppState::new(Arc::new(issuer)));

    Ok(Application { router, pipeline })
}
