//! Transcoding engines
//!
//! An engine turns one input file into one tier's output file inside a
//! scratch directory owned by the caller.

mod ffmpeg;
#[cfg(feature = "image")]
mod image;
mod media;
mod passthrough;

pub use ffmpeg::FfmpegEngine;
#[cfg(feature = "image")]
pub use self::image::ImageEngine;
pub use media::MediaEngine;
pub use passthrough::PassthroughEngine;

use async_trait::async_trait;
use mediaflow_core::MediaKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::tiers::TierSpec;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} failed: {stderr}")]
    CommandFailed { program: String, stderr: String },

    #[cfg(feature = "image")]
    #[error("Image processing failed: {0}")]
    Image(#[from] ::image::ImageError),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// File produced for one tier, with whatever metadata the engine observed.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    pub output_path: PathBuf,
    /// Extension of `output_path`, if it has one.
    pub extension: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<u32>,
}

impl TranscodeOutput {
    pub fn new(output_path: PathBuf) -> Self {
        let extension = output_path
            .extension()
            .map(|ext| ext.to_string_lossy().into_owned());
        Self {
            output_path,
            extension,
            width: None,
            height: None,
            duration_seconds: None,
            bitrate_kbps: None,
        }
    }
}

#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Produce `spec`'s rendition of `input` inside `output_dir`.
    async fn transcode(
        &self,
        input: &Path,
        spec: &TierSpec,
        kind: MediaKind,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, EngineError>;
}

/// `{output_dir}/{tier}.{extension}`
pub(crate) fn output_path(output_dir: &Path, spec: &TierSpec, extension: Option<&str>) -> PathBuf {
    let mut name = spec.tier.as_str().to_string();
    if let Some(ext) = extension {
        name.push('.');
        name.push_str(ext);
    }
    output_dir.join(name)
}
