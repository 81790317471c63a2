//! Video and audio tiers through `ffmpeg`, metadata through `ffprobe`.

use async_trait::async_trait;
use mediaflow_core::MediaKind;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use super::{output_path, EngineError, TranscodeEngine, TranscodeOutput};
use crate::tiers::{TierSpec, TierTarget};

const AUDIO_TRACK_KBPS: u32 = 128;

/// Observed properties of a media file.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ProbeResult {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub bitrate_kbps: Option<u32>,
}

/// Read `ffprobe -print_format json` output.
pub(crate) fn parse_probe(stdout: &[u8]) -> Result<ProbeResult, EngineError> {
    let probe: serde_json::Value = serde_json::from_slice(stdout).map_err(|e| {
        EngineError::CommandFailed {
            program: "ffprobe".to_string(),
            stderr: format!("unreadable output: {}", e),
        }
    })?;

    let format = &probe["format"];
    let video = probe["streams"]
        .as_array()
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s["codec_type"].as_str() == Some("video"))
        });

    let as_u32 = |v: &serde_json::Value| v.as_u64().and_then(|n| u32::try_from(n).ok());

    Ok(ProbeResult {
        width: video.and_then(|s| as_u32(&s["width"])),
        height: video.and_then(|s| as_u32(&s["height"])),
        duration_seconds: format["duration"]
            .as_str()
            .and_then(|d| d.parse::<f64>().ok()),
        bitrate_kbps: format["bit_rate"]
            .as_str()
            .and_then(|b| b.parse::<u64>().ok())
            .and_then(|bps| u32::try_from(bps / 1000).ok()),
    })
}

/// Shells out to ffmpeg for re-encoding and ffprobe for the result's metadata.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Default for FfmpegEngine {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegEngine {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn video_args(input: &Path, output: &Path, max_width: u32, max_height: u32, kbps: u32) -> Vec<String> {
        // min() against the input size keeps small sources from being upscaled.
        let scale = format!(
            "scale='min({w},iw)':'min({h},ih)':force_original_aspect_ratio=decrease:force_divisible_by=2",
            w = max_width,
            h = max_height
        );
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vf".to_string(),
            scale,
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "fast".to_string(),
            "-b:v".to_string(),
            format!("{}k", kbps),
            "-maxrate".to_string(),
            format!("{}k", kbps),
            "-bufsize".to_string(),
            format!("{}k", kbps * 2),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            format!("{}k", AUDIO_TRACK_KBPS),
            "-movflags".to_string(),
            "+faststart".to_string(),
            output.to_string_lossy().to_string(),
        ]
    }

    fn audio_args(input: &Path, output: &Path, kbps: u32) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            format!("{}k", kbps),
            output.to_string_lossy().to_string(),
        ]
    }

    #[tracing::instrument(skip(self, args), fields(process.executable.name = "ffmpeg"))]
    async fn run_ffmpeg(&self, tier: &str, args: Vec<String>) -> Result<(), EngineError> {
        let start = std::time::Instant::now();

        let output = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::CommandFailed {
                program: "ffmpeg".to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        tracing::debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            "ffmpeg finished"
        );
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(process.executable.name = "ffprobe"))]
    pub(crate) async fn probe(&self, path: &Path) -> Result<ProbeResult, EngineError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(EngineError::CommandFailed {
                program: "ffprobe".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe(&output.stdout)
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn transcode(
        &self,
        input: &Path,
        spec: &TierSpec,
        kind: MediaKind,
        output_dir: &Path,
    ) -> Result<TranscodeOutput, EngineError> {
        let destination = output_path(output_dir, spec, spec.output_extension());

        let args = match spec.target {
            TierTarget::Video {
                max_width,
                max_height,
                bitrate_kbps,
            } => Self::video_args(input, &destination, max_width, max_height, bitrate_kbps),
            TierTarget::Audio { bitrate_kbps } => Self::audio_args(input, &destination, bitrate_kbps),
            TierTarget::Passthrough | TierTarget::Image { .. } => {
                return Err(EngineError::Unsupported(format!(
                    "ffmpeg engine cannot produce {} for {}",
                    spec.tier, kind
                )));
            }
        };

        self.run_ffmpeg(spec.tier.as_str(), args).await?;

        let mut output = TranscodeOutput::new(destination);
        match self.probe(&output.output_path).await {
            Ok(probe) => {
                output.width = probe.width;
                output.height = probe.height;
                output.duration_seconds = probe.duration_seconds;
                output.bitrate_kbps = probe.bitrate_kbps;
            }
            Err(e) => {
                // The encoded file is still usable without metadata.
                tracing::warn!(error = %e, tier = %spec.tier, "Failed to probe transcoded output");
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_core::QualityTier;
    use std::path::PathBuf;

    #[test]
    fn parses_ffprobe_json() {
        let stdout = br#"{
            "streams": [
                {"codec_type": "audio", "sample_rate": "48000"},
                {"codec_type": "video", "width": 1280, "height": 720}
            ],
            "format": {"duration": "12.480000", "bit_rate": "2631000"}
        }"#;
        let probe = parse_probe(stdout).unwrap();
        assert_eq!(probe.width, Some(1280));
        assert_eq!(probe.height, Some(720));
        assert_eq!(probe.duration_seconds, Some(12.48));
        assert_eq!(probe.bitrate_kbps, Some(2631));
    }

    #[test]
    fn audio_only_probe_has_no_dimensions() {
        let stdout = br#"{"streams":[{"codec_type":"audio"}],"format":{"duration":"3.5"}}"#;
        let probe = parse_probe(stdout).unwrap();
        assert_eq!(probe.width, None);
        assert_eq!(probe.duration_seconds, Some(3.5));
        assert_eq!(probe.bitrate_kbps, None);
        assert!(parse_probe(b"garbage").is_err());
    }

    #[test]
    fn video_args_cap_size_and_bitrate() {
        let args = FfmpegEngine::video_args(
            &PathBuf::from("/tmp/in.mov"),
            &PathBuf::from("/tmp/out/high.mp4"),
            1920,
            1080,
            5000,
        );
        assert!(args.iter().any(|a| a.contains("min(1920,iw)") && a.contains("min(1080,ih)")));
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "5000k"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out/high.mp4"));
    }

    #[tokio::test]
    async fn rejects_non_ffmpeg_targets() {
        let spec = TierSpec::new(QualityTier::Original, TierTarget::Passthrough);
        let result = FfmpegEngine::default()
            .transcode(Path::new("/tmp/in"), &spec, MediaKind::Video, Path::new("/tmp"))
            .await;
        assert!(matches!(result, Err(EngineError::Unsupported(_))));
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let engine = FfmpegEngine::new("/nonexistent/ffmpeg", "/nonexistent/ffprobe");
        let spec = TierSpec::new(QualityTier::Low, TierTarget::Audio { bitrate_kbps: 128 });
        let result = engine
            .transcode(Path::new("/tmp/in.wav"), &spec, MediaKind::Audio, Path::new("/tmp"))
            .await;
        assert!(matches!(result, Err(EngineError::Io(_))));
    }
}
