//! Quality tier targets per media kind.

use mediaflow_core::{MediaKind, QualityTier};

/// What a single tier should be turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierTarget {
    /// Store the source bytes unchanged.
    Passthrough,
    /// Fit inside `max_width`×`max_height` and re-encode as JPEG.
    Image {
        max_width: u32,
        max_height: u32,
        quality: u8,
    },
    /// Scale inside `max_width`×`max_height`, H.264/AAC in MP4.
    Video {
        max_width: u32,
        max_height: u32,
        bitrate_kbps: u32,
    },
    /// MP3 at a constant bitrate.
    Audio { bitrate_kbps: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub tier: QualityTier,
    pub target: TierTarget,
}

impl TierSpec {
    pub const fn new(tier: QualityTier, target: TierTarget) -> Self {
        Self { tier, target }
    }

    /// Output file extension, `None` when the source extension is kept.
    pub fn output_extension(&self) -> Option<&'static str> {
        match self.target {
            TierTarget::Passthrough => None,
            TierTarget::Image { .. } => Some("jpg"),
            TierTarget::Video { .. } => Some("mp4"),
            TierTarget::Audio { .. } => Some("mp3"),
        }
    }
}

const ORIGINAL: TierSpec = TierSpec::new(QualityTier::Original, TierTarget::Passthrough);

const DOCUMENT_TIERS: [TierSpec; 1] = [ORIGINAL];

const IMAGE_TIERS: [TierSpec; 4] = [
    ORIGINAL,
    TierSpec::new(
        QualityTier::High,
        TierTarget::Image {
            max_width: 1920,
            max_height: 1080,
            quality: 90,
        },
    ),
    TierSpec::new(
        QualityTier::Medium,
        TierTarget::Image {
            max_width: 1280,
            max_height: 720,
            quality: 80,
        },
    ),
    TierSpec::new(
        QualityTier::Low,
        TierTarget::Image {
            max_width: 854,
            max_height: 480,
            quality: 60,
        },
    ),
];

const VIDEO_TIERS: [TierSpec; 4] = [
    ORIGINAL,
    TierSpec::new(
        QualityTier::High,
        TierTarget::Video {
            max_width: 1920,
            max_height: 1080,
            bitrate_kbps: 5000,
        },
    ),
    TierSpec::new(
        QualityTier::Medium,
        TierTarget::Video {
            max_width: 1280,
            max_height: 720,
            bitrate_kbps: 2500,
        },
    ),
    TierSpec::new(
        QualityTier::Low,
        TierTarget::Video {
            max_width: 854,
            max_height: 480,
            bitrate_kbps: 1000,
        },
    ),
];

const AUDIO_TIERS: [TierSpec; 4] = [
    ORIGINAL,
    TierSpec::new(QualityTier::High, TierTarget::Audio { bitrate_kbps: 320 }),
    TierSpec::new(QualityTier::Medium, TierTarget::Audio { bitrate_kbps: 192 }),
    TierSpec::new(QualityTier::Low, TierTarget::Audio { bitrate_kbps: 128 }),
];

/// Tiers produced for `kind`, in tier order.
pub fn tier_plan(kind: MediaKind) -> &'static [TierSpec] {
    match kind {
        MediaKind::Image => &IMAGE_TIERS,
        MediaKind::Video => &VIDEO_TIERS,
        MediaKind::Audio => &AUDIO_TIERS,
        MediaKind::Document => &DOCUMENT_TIERS,
    }
}
