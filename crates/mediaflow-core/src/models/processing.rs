use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::TransitionError;
use crate::models::QualityTier;

/// Lifecycle status of a processing record.
///
/// `Pending -> {Completed, Failed}`; both outcomes are terminal. `Processing`
/// is part of the wire vocabulary but nothing in the pipeline writes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// Check that a record in this status may be written with `next`.
    ///
    /// Re-writing the same terminal status is allowed (idempotent reapply).
    pub fn check_transition(&self, next: ProcessingStatus) -> Result<(), TransitionError> {
        use ProcessingStatus::*;

        match (*self, next) {
            (Pending | Processing, _) => Ok(()),
            (current, Pending | Processing) => Err(TransitionError::RegressionToPending {
                current,
                requested: next,
            }),
            (current, requested) if current == requested => Ok(()),
            (current, requested) => Err(TransitionError::ConflictingOutcome { current, requested }),
        }
    }
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid processing status: {}", s)),
        }
    }
}

/// One stored output of a processing job. Immutable once materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: i64,
    pub processing_record_id: i64,
    pub quality_tier: QualityTier,
    pub storage_key: String,
    pub byte_size: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<u32>,
}

/// How a terminal outcome was merged into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record left `Pending`.
    Applied,
    /// The record already carried this outcome; it was written again.
    Reapplied,
}

/// Persistent lifecycle of one media item from upload intent to outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRecord {
    pub id: i64,
    pub source_media_id: i64,
    pub upload_key: String,
    pub status: ProcessingStatus,
    pub original_file_url: Option<String>,
    pub variants: Vec<Variant>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn pending(
        id: i64,
        source_media_id: i64,
        upload_key: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            source_media_id,
            upload_key: upload_key.into(),
            status: ProcessingStatus::Pending,
            original_file_url: None,
            variants: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Id of an already materialized variant with the same tier and key.
    pub fn existing_variant_id(&self, tier: QualityTier, storage_key: &str) -> Option<i64> {
        self.variants
            .iter()
            .find(|v| v.quality_tier == tier && v.storage_key == storage_key)
            .map(|v| v.id)
    }

    /// Move to `Completed` with `variants` as the full variant set.
    pub fn complete(
        &mut self,
        mut variants: Vec<Variant>,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        if variants.is_empty() {
            return Err(TransitionError::EmptyVariants);
        }
        self.status.check_transition(ProcessingStatus::Completed)?;
        let transition = self.transition_kind();

        variants.sort_by_key(|v| v.quality_tier);
        for variant in &mut variants {
            variant.processing_record_id = self.id;
        }

        self.original_file_url = variants
            .iter()
            .find(|v| v.quality_tier == QualityTier::Original)
            .map(|v| v.storage_key.clone());
        self.variants = variants;
        self.error_message = None;
        self.status = ProcessingStatus::Completed;
        self.touch(now);

        Ok(transition)
    }

    /// Move to `Failed` with `error` as the reason. Clears any variants.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Transition, TransitionError> {
        self.status.check_transition(ProcessingStatus::Failed)?;
        let transition = self.transition_kind();

        self.variants.clear();
        self.original_file_url = None;
        self.error_message = Some(error.into());
        self.status = ProcessingStatus::Failed;
        self.touch(now);

        Ok(transition)
    }

    /// Stamp `updated_at`, keeping it strictly increasing even if `now` lags.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let floor = self.updated_at + Duration::microseconds(1);
        self.updated_at = now.max(floor);
    }

    fn transition_kind(&self) -> Transition {
        if self.status.is_terminal() {
            Transition::Reapplied
        } else {
            Transition::Applied
        }
    }
}

/// Read-only projection returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatusView {
    pub processing_id: i64,
    pub status: ProcessingStatus,
    pub upload_key: String,
    pub original_file_url: Option<String>,
    pub variants: Vec<Variant>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProcessingRecord> for ProcessingStatusView {
    fn from(record: ProcessingRecord) -> Self {
        Self {
            processing_id: record.source_media_id,
            status: record.status,
            upload_key: record.upload_key,
            original_file_url: record.original_file_url,
            variants: record.variants,
            error_message: record.error_message,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
