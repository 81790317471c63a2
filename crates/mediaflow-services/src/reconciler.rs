//! Completion reconciliation
//!
//! Merges worker outcomes into processing records. Delivery is at-least-once,
//! so the same completion may arrive more than once; re-applying a terminal
//! outcome is a no-op in effect, and a terminal record never moves back to
//! PENDING or flips to the opposite outcome.

use async_trait::async_trait;
use chrono::Utc;
use mediaflow_core::{
    BrokerMessage, CompletionMessage, CompletionOutcome, IdAllocator, IdError, ProcessingRecord,
    Transition, TransitionError, Variant, VariantReport,
};
use mediaflow_db::{ProcessingRecordRepository, RepositoryError};
use mediaflow_worker::{Delivery, HandlerError, MessageHandler};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("No processing record for correlation id {0}")]
    UnknownCorrelationId(i64),

    #[error("Failed to allocate variant id: {0}")]
    IdAllocation(#[from] IdError),

    #[error("Repository error: {0}")]
    Repository(#[source] RepositoryError),

    #[error("Rejected transition: {0}")]
    Transition(#[from] TransitionError),
}

impl From<RepositoryError> for ReconcileError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Transition(e) => ReconcileError::Transition(e),
            RepositoryError::NotFound(id) => ReconcileError::UnknownCorrelationId(id),
            other => ReconcileError::Repository(other),
        }
    }
}

impl ReconcileError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            ReconcileError::Repository(e) => e.is_recoverable(),
            ReconcileError::IdAllocation(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

/// How a completion message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The record left PENDING.
    Applied,
    /// The record already had this outcome; it was written again.
    Reapplied,
    /// No record matches the correlation id; the message was dropped.
    UnknownCorrelation,
    /// The outcome contradicts the stored terminal state; the message was dropped.
    Conflict,
}

impl From<Transition> for ReconcileOutcome {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Applied => ReconcileOutcome::Applied,
            Transition::Reapplied => ReconcileOutcome::Reapplied,
        }
    }
}

pub struct CompletionReconciler {
    repository: Arc<dyn ProcessingRecordRepository>,
    ids: Arc<IdAllocator>,
}

impl CompletionReconciler {
    pub fn new(repository: Arc<dyn ProcessingRecordRepository>, ids: Arc<IdAllocator>) -> Self {
        Self { repository, ids }
    }

    /// Merge `message` into its record.
    ///
    /// Unknown correlation ids and conflicting outcomes are logged and
    /// reported as outcomes, not errors; they are never worth retrying.
    #[tracing::instrument(skip(self, message), fields(
        correlation_id = message.correlation_id,
        outcome = %message.outcome.status()
    ))]
    pub async fn reconcile(
        &self,
        message: &CompletionMessage,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self.apply(message).await {
            Ok(transition) => {
                tracing::info!(transition = ?transition, "Completion reconciled");
                Ok(transition.into())
            }
            Err(ReconcileError::UnknownCorrelationId(id)) => {
                tracing::warn!(
                    correlation_id = id,
                    storage_key = %message.storage_key,
                    "Completion for unknown processing record, dropping"
                );
                Ok(ReconcileOutcome::UnknownCorrelation)
            }
            Err(ReconcileError::Transition(
                e @ (TransitionError::ConflictingOutcome { .. }
                | TransitionError::RegressionToPending { .. }),
            )) => {
                tracing::warn!(error = %e, "Completion conflicts with stored outcome, dropping");
                Ok(ReconcileOutcome::Conflict)
            }
            Err(e) => Err(e),
        }
    }

    async fn apply(&self, message: &CompletionMessage) -> Result<Transition, ReconcileError> {
        let mut record = self
            .repository
            .find_by_source_media_id(message.correlation_id)
            .await?
            .ok_or(ReconcileError::UnknownCorrelationId(message.correlation_id))?;

        let now = Utc::now();
        let transition = match &message.outcome {
            CompletionOutcome::Completed { variants } => {
                let variants = self.materialize(&record, variants)?;
                record.complete(variants, now)?
            }
            CompletionOutcome::Failed { error } => record.fail(error.clone(), now)?,
        };

        self.repository.update(&record).await?;
        Ok(transition)
    }

    /// Turn reports into variants, keeping the id of any variant already
    /// stored for the same tier and key.
    fn materialize(
        &self,
        record: &ProcessingRecord,
        reports: &[VariantReport],
    ) -> Result<Vec<Variant>, ReconcileError> {
        reports
            .iter()
            .map(|report| {
                let id = match record.existing_variant_id(report.quality_tier, &report.storage_key) {
                    Some(id) => id,
                    None => self.ids.generate()?,
                };
                Ok(Variant {
                    id,
                    processing_record_id: record.id,
                    quality_tier: report.quality_tier,
                    storage_key: report.storage_key.clone(),
                    byte_size: report.byte_size,
                    width: report.width,
                    height: report.height,
                    duration_seconds: report.duration_seconds,
                    bitrate_kbps: report.bitrate_kbps,
                })
            })
            .collect()
    }
}

#[async_trait]
impl MessageHandler for CompletionReconciler {
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let message = CompletionMessage::decode(&delivery.payload).map_err(|e| {
            tracing::warn!(
                partition = delivery.partition,
                offset = delivery.offset,
                error = %e,
                "Dropping malformed completion message"
            );
            HandlerError::unrecoverable(e)
        })?;

        match self.reconcile(&message).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_recoverable() => Err(HandlerError::recoverable(e).into()),
            Err(e) => Err(HandlerError::unrecoverable(e).into()),
        }
    }
}
