//! Configuration module
//!
//! Every component reads its settings from the environment (optionally seeded
//! from a `.env` file). Values that are present but unparsable are errors;
//! absent values fall back to the defaults below.

use anyhow::Context;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 4000;
const DB_MAX_CONNECTIONS: u32 = 10;
const UPLOAD_URL_TTL_SECS: u64 = 3600;
const BROKER_PARTITIONS: usize = 8;
const BROKER_BACKLOG_LIMIT: usize = 1024;
const DOWNLOAD_MAX_ATTEMPTS: u32 = 5;
const DOWNLOAD_RETRY_STEP_SECS: u64 = 2;
const HANDLER_MAX_ATTEMPTS: u32 = 1;

/// Process-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub environment: String,
    pub server_port: u16,
    pub database_url: String,
    pub db_max_connections: u32,
    /// `text` or `json`
    pub log_format: String,
}

/// Object storage settings
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO etc.)
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub upload_url_ttl: Duration,
}

/// Topic, consumer group and delivery policy settings
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub ingest_topic: String,
    pub completion_topic: String,
    pub partitions: usize,
    /// Messages kept per partition for consumer groups that join late.
    pub backlog_limit: usize,
    pub worker_group: String,
    pub reconciler_group: String,
    pub handler_max_attempts: u32,
    pub dead_letter_topic: Option<String>,
}

/// Transcoding worker settings
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub download_max_attempts: u32,
    pub download_retry_step: Duration,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    pub storage: StorageConfig,
    pub broker: BrokerConfig,
    pub worker: WorkerConfig,
    pub id_instance_id: Option<u16>,
}

impl Config {
    /// Load `.env` (if any) and read configuration from the process environment.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base = BaseConfig {
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            server_port: parse_or(&var, "PORT", SERVER_PORT)?,
            database_url: var("DATABASE_URL").context("DATABASE_URL must be set")?,
            db_max_connections: parse_or(&var, "DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS)?,
            log_format: var("LOG_FORMAT")
                .unwrap_or_else(|| "text".to_string())
                .to_lowercase(),
        };

        let storage = StorageConfig {
            backend: parse_or(&var, "STORAGE_BACKEND", StorageBackend::S3)?,
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION").or_else(|| var("AWS_REGION")),
            s3_endpoint: var("S3_ENDPOINT"),
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
            upload_url_ttl: Duration::from_secs(parse_or(
                &var,
                "UPLOAD_URL_TTL_SECS",
                UPLOAD_URL_TTL_SECS,
            )?),
        };

        let broker = BrokerConfig {
            ingest_topic: var("INGEST_TOPIC").unwrap_or_else(|| "ingest".to_string()),
            completion_topic: var("COMPLETION_TOPIC").unwrap_or_else(|| "completion".to_string()),
            partitions: parse_or(&var, "BROKER_PARTITIONS", BROKER_PARTITIONS)?,
            backlog_limit: parse_or(&var, "BROKER_BACKLOG_LIMIT", BROKER_BACKLOG_LIMIT)?,
            worker_group: var("WORKER_GROUP").unwrap_or_else(|| "transcoding-worker".to_string()),
            reconciler_group: var("RECONCILER_GROUP")
                .unwrap_or_else(|| "completion-reconciler".to_string()),
            handler_max_attempts: parse_or(&var, "HANDLER_MAX_ATTEMPTS", HANDLER_MAX_ATTEMPTS)?,
            dead_letter_topic: var("DEAD_LETTER_TOPIC"),
        };

        let worker = WorkerConfig {
            download_max_attempts: parse_or(&var, "DOWNLOAD_MAX_ATTEMPTS", DOWNLOAD_MAX_ATTEMPTS)?,
            download_retry_step: Duration::from_secs(parse_or(
                &var,
                "DOWNLOAD_RETRY_STEP_SECS",
                DOWNLOAD_RETRY_STEP_SECS,
            )?),
            ffmpeg_path: var("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: var("FFPROBE_PATH").unwrap_or_else(|| "ffprobe".to_string()),
        };

        let id_instance_id = var("ID_INSTANCE_ID")
            .map(|raw| {
                raw.trim()
                    .parse::<u16>()
                    .with_context(|| format!("ID_INSTANCE_ID is not a valid number: {}", raw))
            })
            .transpose()?;

        Ok(Config {
            base,
            storage,
            broker,
            worker,
            id_instance_id,
        })
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        matches!(
            self.base.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.base.database_url.starts_with("postgres://")
            && !self.base.database_url.starts_with("postgresql://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if !matches!(self.base.log_format.as_str(), "text" | "json") {
            return Err(anyhow::anyhow!("LOG_FORMAT must be 'text' or 'json'"));
        }

        if let Some(instance_id) = self.id_instance_id {
            if instance_id > crate::id::MAX_INSTANCE_ID {
                return Err(anyhow::anyhow!(
                    "ID_INSTANCE_ID must be between 0 and {}",
                    crate::id::MAX_INSTANCE_ID
                ));
            }
        }

        if self.storage.upload_url_ttl.is_zero() {
            return Err(anyhow::anyhow!("UPLOAD_URL_TTL_SECS must be greater than 0"));
        }

        if self.broker.partitions == 0 {
            return Err(anyhow::anyhow!("BROKER_PARTITIONS must be greater than 0"));
        }

        if self.broker.handler_max_attempts == 0 {
            return Err(anyhow::anyhow!("HANDLER_MAX_ATTEMPTS must be at least 1"));
        }

        if self.worker.download_max_attempts == 0 {
            return Err(anyhow::anyhow!("DOWNLOAD_MAX_ATTEMPTS must be at least 1"));
        }

        match self.storage.backend {
            StorageBackend::S3 => {
                if self.storage.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.storage.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.storage.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.storage.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::Memory => {
                if self.is_production() {
                    return Err(anyhow::anyhow!(
                        "The memory storage backend cannot be used in production"
                    ));
                }
            }
        }

        Ok(())
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, anyhow::Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, anyhow::Error> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[
            ("DATABASE_URL", "postgresql://localhost/mediaflow"),
            ("S3_BUCKET", "media"),
            ("AWS_REGION", "eu-west-1"),
        ])
        .unwrap();

        assert_eq!(config.base.server_port, 4000);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.s3_region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.storage.upload_url_ttl, Duration::from_secs(3600));
        assert_eq!(config.broker.ingest_topic, "ingest");
        assert_eq!(config.broker.completion_topic, "completion");
        assert_eq!(config.broker.handler_max_attempts, 1);
        assert_eq!(config.broker.backlog_limit, 1024);
        assert_eq!(config.worker.download_max_attempts, 5);
        assert_eq!(config.worker.download_retry_step, Duration::from_secs(2));
        assert!(config.id_instance_id.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn database_url_is_required() {
        assert!(load(&[]).is_err());
    }

    #[test]
    fn unparsable_values_are_errors() {
        let err = load(&[
            ("DATABASE_URL", "postgresql://localhost/mediaflow"),
            ("PORT", "eighty"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn validate_checks_backend_settings() {
        let config = load(&[
            ("DATABASE_URL", "postgresql://localhost/mediaflow"),
            ("STORAGE_BACKEND", "local"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = load(&[
            ("DATABASE_URL", "postgresql://localhost/mediaflow"),
            ("STORAGE_BACKEND", "memory"),
            ("ID_INSTANCE_ID", "2000"),
        ])
        .unwrap();
        assert!(config.validate().is_err());

        let config = load(&[
            ("DATABASE_URL", "postgresql://localhost/mediaflow"),
            ("STORAGE_BACKEND", "memory"),
            ("ID_INSTANCE_ID", "12"),
        ])
        .unwrap();
        assert_eq!(config.id_instance_id, Some(12));
        config.validate().unwrap();
    }
}
