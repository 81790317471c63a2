use async_trait::async_trait;
use mediaflow_core::MediaKind;
use std::path::Path;

use super::{EngineError, FfmpegEngine, PassthroughEngine, TranscodeEngine, TranscodeOutput};
use crate::tiers::{TierSpec, TierTarget};

/// Routes each tier to the engine that can produce it.
#[derive(Debug, Clone, Default)]
pub struct MediaEngine {
    passthrough: PassthroughEngine,
    #[cfg(feature = "image")]
    image: super::ImageEngine,
    ffmpeg: FfmpegEngine,
}

impl MediaEngine {
    pub fn new(ffmpeg: FfmpegEngine) -> Self {
        Self {
            ffmpeg,
            ..Self::default()
        }
    }
}

#[async_trait]
impl TranscodeEngine for MediaEngine {
    async fn transcode(
        &self,
        input: &Path,
        spec: &TierSpec,
        kind: MediaKind,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, EngineError> {
        match spec.target {
            TierTarget::Passthrough => {
                self.passthrough
                    .transcode(input, spec, kind, output_dir)
                    .await
            }
            #[cfg(feature = "image")]
            TierTarget::Image { .. } => self.image.transcode(input, spec, kind, output_dir).await,
            #[cfg(not(feature = "image"))]
            TierTarget::Image { .. } => Err(EngineError::Unsupported(
                "image support is not compiled in".to_string(),
            )),
            TierTarget::Video { .. } if cfg!(feature = "video") => {
                self.ffmpeg.transcode(input, spec, kind, output_dir).await
            }
            TierTarget::Audio { .. } if cfg!(feature = "audio") => {
                self.ffmpeg.transcode(input, spec, kind, output_dir).await
            }
            TierTarget::Video { .. } | TierTarget::Audio { .. } => Err(EngineError::Unsupported(
                format!("{} support is not compiled in", kind),
            )),
        }
    }
}
