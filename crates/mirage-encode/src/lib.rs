//! Video encoder abstraction consumed by the Mirage host streaming engine.
//!
//! The host never talks to `VideoToolbox` (or any other platform encoder
//! API) directly — it only knows the [`Encoder`] trait. A concrete
//! implementation (out of scope for this crate) turns raw pixel buffers
//! into timestamped access units.

use std::time::Duration;

/// Pixel format accepted by an [`Encoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgra,
    Rgba,
    Nv12,
}

/// Output color space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Srgb,
    DisplayP3,
    Rec709,
}

/// Governs how aggressively a [`crate`] consumer drops frames versus
/// buffers them (§4.F, GLOSSARY "Latency mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LatencyMode {
    Smoothest,
    Balanced,
    Lowest,
}

/// Encoder configuration, per the `Encoder::configure` contract in §6.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub min_bitrate_bps: u32,
    pub max_bitrate_bps: u32,
    pub keyframe_interval: u32,
    /// Inter-frame quality, 0.0–1.0.
    pub quality: f32,
    /// Keyframe quality, 0.0–1.0, decoupled from `quality` (§4.F).
    pub keyframe_quality: f32,
    pub pixel_format: PixelFormat,
    pub color_space: ColorSpace,
    pub latency_mode: LatencyMode,
}

impl EncoderConfig {
    /// Clamp `min`/`max` bitrate and quality fields into their valid
    /// ranges. Mirrors the clamping the stream context performs before
    /// handing a config to the encoder (§4.F "Bitrate is clamped to
    /// `[minBitrate, maxBitrate]`").
    #[must_use]
    pub fn clamped(mut self) -> Self {
        if self.min_bitrate_bps > self.max_bitrate_bps {
            std::mem::swap(&mut self.min_bitrate_bps, &mut self.max_bitrate_bps);
        }
        self.quality = self.quality.clamp(0.0, 1.0);
        self.keyframe_quality = self.keyframe_quality.clamp(0.0, 1.0);
        self
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 60,
            min_bitrate_bps: 500_000,
            max_bitrate_bps: 12_000_000,
            keyframe_interval: 120,
            quality: 0.8,
            keyframe_quality: 0.9,
            pixel_format: PixelFormat::Bgra,
            color_space: ColorSpace::Srgb,
            latency_mode: LatencyMode::Balanced,
        }
    }
}

/// A single encoded access unit (NAL/OBU-style), timestamped relative to
/// stream start.
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub data: Vec<u8>,
    pub timestamp: Duration,
    pub keyframe: bool,
}

/// Errors an [`Encoder`] may report.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("encoder does not support {width}x{height}")]
    UnsupportedResolution { width: u32, height: u32 },
    #[error("encoder not configured")]
    NotConfigured,
    #[error("encoder backend error: {0}")]
    Backend(String),
}

/// Video encoder collaborator contract (§6).
pub trait Encoder: Send {
    /// (Re)configure the encoder. May be called while frames are in
    /// flight to retarget resolution, framerate, or bitrate bounds.
    ///
    /// # Errors
    /// Returns [`EncodeError::UnsupportedResolution`] if the backend
    /// cannot encode at the requested dimensions.
    fn configure(&mut self, config: EncoderConfig) -> Result<(), EncodeError>;

    /// Submit a raw pixel buffer for encoding. Returns zero or more
    /// access units — encoders that buffer frames (B-frame lookahead)
    /// may return none for a given call and flush later ones in a
    /// subsequent call.
    ///
    /// # Errors
    /// Returns [`EncodeError::NotConfigured`] if called before
    /// [`Encoder::configure`], or [`EncodeError::Backend`] on a
    /// backend-specific failure.
    fn submit_frame(
        &mut self,
        pixels: &[u8],
        timestamp: Duration,
    ) -> Result<Vec<AccessUnit>, EncodeError>;

    /// Schedule an IDR/keyframe at the next encode tick (§4.F
    /// `requestKeyframe`).
    fn request_keyframe(&mut self);
}

/// Per-stage configuration for the quality probe (§4.M).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityStage {
    pub target_bitrate_bps: u32,
    pub duration_ms: u32,
}

/// Result of an encode benchmark run, persisted across restarts
/// (SPEC_FULL §3 "Persisted records").
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EncodeBenchmarkRecord {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encode_ms: f64,
    pub decode_ms: f64,
    pub measured_at_unix_secs: u64,
}
