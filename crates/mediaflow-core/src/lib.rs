//! Mediaflow Core Library
//!
//! This crate provides the domain models, broker message contracts, identifier
//! allocation, error types and configuration shared by every mediaflow component.

pub mod config;
pub mod error;
pub mod id;
pub mod messages;
pub mod models;
pub mod storage_types;

// Re-export commonly used types
pub use config::{BaseConfig, BrokerConfig, Config, StorageConfig, WorkerConfig};
pub use error::{IdError, MessageError, TransitionError};
pub use id::{Clock, IdAllocator, ParsedId, SystemClock};
pub use messages::{
    BrokerMessage, CompletionMessage, CompletionOutcome, IngestionMessage, VariantReport,
};
pub use models::{
    MediaKind, ProcessingRecord, ProcessingStatus, ProcessingStatusView, QualityTier, Transition,
    Variant,
};
pub use storage_types::StorageBackend;
