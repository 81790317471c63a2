use async_trait::async_trait;
use mediaflow_core::MediaKind;
use std::path::Path;

use super::{output_path, EngineError, TranscodeEngine, TranscodeOutput};
use crate::tiers::TierSpec;

/// Copies the source unchanged. Used for ORIGINAL and for documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEngine;

#[async_trait]
impl TranscodeEngine for PassthroughEngine {
    async fn transcode(
        &self,
        input: &Path,
        spec: &TierSpec,
        kind: MediaKind,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, EngineError> {
        let extension = input.extension().map(|e| e.to_string_lossy().into_owned());
        let destination = output_path(output_dir, spec, extension.as_deref());
        tokio::fs::copy(input, &destination).await?;

        let mut output = TranscodeOutput::new(destination);

        #[cfg(feature = "image")]
        if kind == MediaKind::Image {
            // Header read only; a file the decoder cannot identify is still stored.
            if let Ok((width, height)) = ::image::image_dimensions(input) {
                output.width = Some(width);
                output.height = Some(height);
            }
        }
        #[cfg(not(feature = "image"))]
        let _ = kind;

        Ok(output)
    }
}
