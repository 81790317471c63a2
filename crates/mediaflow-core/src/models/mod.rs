pub mod media;
pub mod processing;

pub use media::{MediaKind, QualityTier};
pub use processing::{
    ProcessingRecord, ProcessingStatus, ProcessingStatusView, Transition, Variant,
};
