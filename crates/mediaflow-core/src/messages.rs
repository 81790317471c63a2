//! Broker message contracts
//!
//! Both topics carry JSON with camelCase fields. Payloads are validated when
//! they are decoded, so handlers only ever see well-formed messages.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

use crate::error::MessageError;
use crate::models::{MediaKind, ProcessingStatus, QualityTier};

/// A payload that can travel over the broker.
pub trait BrokerMessage: Serialize + DeserializeOwned {
    /// Routing key; all messages sharing it land on one partition.
    fn partition_key(&self) -> String;

    /// Semantic checks beyond the JSON shape.
    fn check(&self) -> Result<(), MessageError>;

    fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let message: Self = serde_json::from_slice(payload)?;
        message.check()?;
        Ok(message)
    }

    fn encode(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Published by the issuer once an upload URL has been handed out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct IngestionMessage {
    pub correlation_id: i64,
    pub owner_id: i64,
    #[validate(length(min = 1, max = 1024))]
    pub storage_key: String,
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    pub media_kind: MediaKind,
    #[validate(range(min = 1))]
    pub byte_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 255))]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl BrokerMessage for IngestionMessage {
    fn partition_key(&self) -> String {
        self.correlation_id.to_string()
    }

    fn check(&self) -> Result<(), MessageError> {
        self.validate()?;
        Ok(())
    }
}

/// Metadata for one tier the worker stored successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VariantReport {
    pub quality_tier: QualityTier,
    #[validate(length(min = 1, max = 1024))]
    pub storage_key: String,
    #[validate(range(min = 0))]
    pub byte_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u32>,
}

/// Terminal outcome of a job, tagged by the `outcome` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionOutcome {
    Completed { variants: Vec<VariantReport> },
    Failed { error: String },
}

impl CompletionOutcome {
    pub fn status(&self) -> ProcessingStatus {
        match self {
            CompletionOutcome::Completed { .. } => ProcessingStatus::Completed,
            CompletionOutcome::Failed { .. } => ProcessingStatus::Failed,
        }
    }
}

/// Published by the worker when a job finishes, successfully or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub correlation_id: i64,
    pub storage_key: String,
    #[serde(flatten)]
    pub outcome: CompletionOutcome,
    pub completed_at: DateTime<Utc>,
}

impl CompletionMessage {
    pub fn completed(
        correlation_id: i64,
        storage_key: impl Into<String>,
        variants: Vec<VariantReport>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            storage_key: storage_key.into(),
            outcome: CompletionOutcome::Completed { variants },
            completed_at,
        }
    }

    pub fn failed(
        correlation_id: i64,
        storage_key: impl Into<String>,
        error: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id,
            storage_key: storage_key.into(),
            outcome: CompletionOutcome::Failed {
                error: error.into(),
            },
            completed_at,
        }
    }
}

impl BrokerMessage for CompletionMessage {
    fn partition_key(&self) -> String {
        self.correlation_id.to_string()
    }

    fn check(&self) -> Result<(), MessageError> {
        if self.storage_key.is_empty() {
            return Err(MessageError::Invalid("storageKey must not be empty".into()));
        }
        match &self.outcome {
            CompletionOutcome::Completed { variants } => {
                if variants.is_empty() {
                    return Err(MessageError::Invalid(
                        "COMPLETED outcome must list at least one variant".into(),
                    ));
                }
                let mut seen = HashSet::with_capacity(variants.len());
                for variant in variants {
                    variant.validate()?;
                    if !seen.insert(variant.quality_tier) {
                        return Err(MessageError::Invalid(format!(
                            "qualityTier {} reported more than once",
                            variant.quality_tier
                        )));
                    }
                }
            }
            CompletionOutcome::Failed { error } => {
                if error.trim().is_empty() {
                    return Err(MessageError::Invalid(
                        "FAILED outcome must carry an error".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}
