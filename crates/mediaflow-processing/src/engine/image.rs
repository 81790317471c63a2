//! Still image tiers using the `image` crate.

use ::image::codecs::jpeg::JpegEncoder;
use ::image::imageops::FilterType;
use ::image::{DynamicImage, ImageReader};
use async_trait::async_trait;
use mediaflow_core::MediaKind;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::{output_path, EngineError, TranscodeEngine, TranscodeOutput};
use crate::tiers::{TierSpec, TierTarget};

/// Downscales into the tier's bounding box and re-encodes as JPEG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageEngine;

impl ImageEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Choose a resampling filter by how far the image shrinks.
fn select_filter(from: (u32, u32), to: (u32, u32)) -> FilterType {
    let ratio = (from.0 as f64 / to.0.max(1) as f64).max(from.1 as f64 / to.1.max(1) as f64);
    if ratio > 4.0 {
        FilterType::Triangle
    } else if ratio > 2.0 {
        FilterType::CatmullRom
    } else {
        FilterType::Lanczos3
    }
}

/// Fit `img` inside the box keeping its aspect ratio. Never enlarges.
fn fit_inside(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width <= max_width && height <= max_height {
        return img;
    }
    let scale = (max_width as f64 / width as f64).min(max_height as f64 / height as f64);
    let target = (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    );
    let filter = select_filter((width, height), target);
    img.resize_exact(target.0, target.1, filter)
}

fn encode_tier(
    input: PathBuf,
    destination: PathBuf,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> Result<(u32, u32), EngineError> {
    let img = ImageReader::open(&input)?.with_guessed_format()?.decode()?;
    let resized = fit_inside(img, max_width, max_height);

    // JPEG has no alpha channel.
    let rgb = resized.to_rgb8();
    let mut writer = BufWriter::new(File::create(&destination)?);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&rgb)?;

    Ok((rgb.width(), rgb.height()))
}

#[async_trait]
impl TranscodeEngine for ImageEngine {
    async fn transcode(
        &self,
        input: &Path,
        spec: &TierSpec,
        kind: MediaKind,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, EngineError> {
        let TierTarget::Image {
            max_width,
            max_height,
            quality,
        } = spec.target
        else {
            return Err(EngineError::Unsupported(format!(
                "image engine cannot produce {} for {}",
                spec.tier, kind
            )));
        };

        let destination = output_path(output_dir, spec, spec.output_extension());
        let (input, dest) = (input.to_path_buf(), destination.clone());

        // Decoding and resizing are CPU bound.
        let (width, height) = tokio::task::spawn_blocking(move || {
            encode_tier(input, dest, max_width, max_height, quality)
        })
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))??;

        tracing::debug!(tier = %spec.tier, width, height, "Image tier encoded");

        let mut output = TranscodeOutput::new(destination);
        output.width = Some(width);
        output.height = Some(height);
        Ok(output)
    }
}
