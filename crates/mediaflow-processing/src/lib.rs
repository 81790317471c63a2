//! Transcoding for the media pipeline
//!
//! Each ingested object is expanded into a fixed set of quality tiers chosen
//! by its [`MediaKind`](mediaflow_core::MediaKind). Tiers are transcoded
//! concurrently by a [`TranscodeEngine`]; the [`TranscodingWorker`] ties the
//! download, fan-out and completion report together.

pub mod engine;
pub mod tiers;
pub mod worker;

pub use engine::{
    EngineError, FfmpegEngine, MediaEngine, PassthroughEngine, TranscodeEngine, TranscodeOutput,
};
#[cfg(feature = "image")]
pub use engine::ImageEngine;
pub use tiers::{tier_plan, TierSpec, TierTarget};
pub use worker::{derive_variant_key, download_with_retry, RetryPolicy, TranscodingWorker, WorkerError};
