//! Stream context (§4.F) — the hardest part of the engine: a
//! per-stream state machine wiring together capture, encoder, and
//! packetizer, with adaptive scale/bitrate and resize bookkeeping.

use std::time::{Duration, Instant};

use mirage_encode::{EncoderConfig, LatencyMode};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    AwaitingRegistration,
    Capturing,
    Paused,
    Stopping,
    Stopped,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid transition from {from:?} on {action}")]
    InvalidTransition { from: StreamState, action: &'static str },
    #[error("capture failed to start: {0}")]
    CaptureStart(String),
    #[error("too many consecutive encode failures")]
    EncodeFailuresExceeded,
}

/// Additional frame flags carried in every stream announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFlags {
    pub login_display: bool,
    pub desktop_stream: bool,
}

/// Consecutive-failure window used by the encode-failure circuit
/// breaker (§4.F "Failure semantics").
const ENCODE_FAILURE_LIMIT: u32 = 5;
const ENCODE_FAILURE_WINDOW: Duration = Duration::from_secs(10);

/// Minimum and maximum effective stream scale (§3 invariant).
pub const MIN_SCALE: f32 = 0.1;
pub const MAX_SCALE: f32 = 1.0;

/// Consecutive same-direction samples required before adaptive scale
/// reacts, so one noisy frame doesn't make the stream scale chatter
/// (§4.F "Adaptive behavior"). Restoring is far more conservative than
/// reducing: a stall should back off immediately, slack should only be
/// trusted once it has held for a while.
const ADAPTIVE_REDUCE_STREAK: u32 = 3;
const ADAPTIVE_RESTORE_STREAK: u32 = 10;
const ADAPTIVE_REDUCE_STEP: f32 = 0.1;
const ADAPTIVE_RESTORE_STEP: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleAdjustment {
    Reduce,
    Restore,
}

/// Watches sustained over/under-budget frame samples and decides when
/// stream scale should step down or cautiously step back up.
struct AdaptiveScaleTracker {
    over_budget_streak: u32,
    under_budget_streak: u32,
}

impl AdaptiveScaleTracker {
    fn new() -> Self {
        Self {
            over_budget_streak: 0,
            under_budget_streak: 0,
        }
    }

    fn observe(&mut self, over_budget: bool) -> Option<ScaleAdjustment> {
        if over_budget {
            self.under_budget_streak = 0;
            self.over_budget_streak += 1;
            if self.over_budget_streak >= ADAPTIVE_REDUCE_STREAK {
                self.over_budget_streak = 0;
                return Some(ScaleAdjustment::Reduce);
            }
        } else {
            self.over_budget_streak = 0;
            self.under_budget_streak += 1;
            if self.under_budget_streak >= ADAPTIVE_RESTORE_STREAK {
                self.under_budget_streak = 0;
                return Some(ScaleAdjustment::Restore);
            }
        }
        None
    }
}

struct EncodeFailureTracker {
    count: u32,
    window_start: Instant,
}

impl EncodeFailureTracker {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Record a failure; returns true if the circuit breaker should
    /// trip (too many failures within the window).
    fn record(&mut self) -> bool {
        if self.window_start.elapsed() > ENCODE_FAILURE_WINDOW {
            self.count = 0;
            self.window_start = Instant::now();
        }
        self.count += 1;
        self.count >= ENCODE_FAILURE_LIMIT
    }

    fn reset(&mut self) {
        self.count = 0;
        self.window_start = Instant::now();
    }
}

/// A pending stream announcement the caller should send to the
/// client (`streamStarted`/`desktopStreamStarted`/`streamScaleChange`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamAnnouncement {
    pub stream_id: u16,
    pub dimension_token: u32,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Per-stream state machine: `created -> awaitingRegistration ->
/// capturing -> (paused <-> capturing) -> stopping -> stopped`.
pub struct StreamContext {
    pub stream_id: u16,
    pub window_id: u32,
    pub flags: StreamFlags,
    state: StreamState,
    encoder_config: EncoderConfig,
    stream_scale: f32,
    dimension_token: u32,
    adaptive_scale_enabled: bool,
    last_captured_frame: Option<Instant>,
    shared_display_generation: Option<u64>,
    startup: Instant,
    encode_failures: EncodeFailureTracker,
    adaptive_tracker: AdaptiveScaleTracker,
    last_encode_latency: Option<Duration>,
}

impl StreamContext {
    #[must_use]
    pub fn new(stream_id: u16, window_id: u32, flags: StreamFlags, encoder_config: EncoderConfig) -> Self {
        Self {
            stream_id,
            window_id,
            flags,
            state: StreamState::Created,
            encoder_config,
            stream_scale: MAX_SCALE,
            dimension_token: 0,
            adaptive_scale_enabled: true,
            last_captured_frame: None,
            shared_display_generation: None,
            startup: Instant::now(),
            encode_failures: EncodeFailureTracker::new(),
            adaptive_tracker: AdaptiveScaleTracker::new(),
            last_encode_latency: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[must_use]
    pub fn dimension_token(&self) -> u32 {
        self.dimension_token
    }

    #[must_use]
    pub fn stream_scale(&self) -> f32 {
        self.stream_scale
    }

    #[must_use]
    pub fn encoder_config(&self) -> &EncoderConfig {
        &self.encoder_config
    }

    /// Capture and encoder are wired; moves `created -> awaitingRegistration`.
    pub fn start(&mut self) -> Result<(), StreamError> {
        if self.state != StreamState::Created {
            return Err(StreamError::InvalidTransition {
                from: self.state,
                action: "start",
            });
        }
        self.state = StreamState::AwaitingRegistration;
        Ok(())
    }

    /// First UDP registration datagram for this stream's id arrived.
    /// Idempotent: a second registration is a no-op, not an error.
    pub fn register(&mut self) {
        if self.state == StreamState::AwaitingRegistration {
            self.state = StreamState::Capturing;
            info!(stream_id = self.stream_id, "stream registered, capturing");
        }
    }

    /// Whether a captured frame may currently be sent to the client
    /// (invariant 3: registration gating).
    #[must_use]
    pub fn may_emit_frames(&self) -> bool {
        matches!(self.state, StreamState::Capturing)
    }

    pub fn pause(&mut self) -> Result<(), StreamError> {
        if self.state != StreamState::Capturing {
            return Err(StreamError::InvalidTransition {
                from: self.state,
                action: "pause",
            });
        }
        self.state = StreamState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), StreamError> {
        if self.state != StreamState::Paused {
            return Err(StreamError::InvalidTransition {
                from: self.state,
                action: "resume",
            });
        }
        self.state = StreamState::Capturing;
        Ok(())
    }

    /// Bump the dimension token and retarget the encoder. Returns the
    /// announcement to send, or `None` if the new dimensions are
    /// identical to the current configuration (round-trip/idempotence
    /// property: identical calls produce no new token).
    pub fn update_resolution(&mut self, width: u32, height: u32) -> Option<StreamAnnouncement> {
        if self.encoder_config.width == width && self.encoder_config.height == height {
            return None;
        }
        self.encoder_config.width = width;
        self.encoder_config.height = height;
        self.dimension_token += 1;
        Some(StreamAnnouncement {
            stream_id: self.stream_id,
            dimension_token: self.dimension_token,
            width,
            height,
            frame_rate: self.encoder_config.fps,
        })
    }

    /// Clamp `scale` to `[MIN_SCALE, MAX_SCALE]`. For desktop-mode
    /// streams scale is realized by the caller shrinking the virtual
    /// display resolution, not by this function (§4.F).
    pub fn update_stream_scale(&mut self, scale: f32) -> f32 {
        self.stream_scale = scale.clamp(MIN_SCALE, MAX_SCALE);
        self.stream_scale
    }

    /// Encoded dimensions at the current scale, rounding half to even
    /// as specified.
    #[must_use]
    pub fn scaled_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        if self.flags.desktop_stream {
            return (source_width, source_height);
        }
        (
            round_even(source_width as f64 * f64::from(self.stream_scale)),
            round_even(source_height as f64 * f64::from(self.stream_scale)),
        )
    }

    pub fn update_frame_rate(&mut self, fps: u32) {
        let ceiling = match self.encoder_config.latency_mode {
            LatencyMode::Lowest => 30,
            LatencyMode::Balanced => 60,
            LatencyMode::Smoothest => 120,
        };
        self.encoder_config.fps = fps.min(ceiling);
    }

    #[must_use]
    pub fn target_frame_time(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.encoder_config.fps.max(1)))
    }

    /// Feed one frame-budget sample (§4.F "Adaptive behavior"): the
    /// producer's current queue depth against the configured
    /// capture-queue-depth threshold, and the last encoder latency
    /// against the target frame time. Over budget on either axis
    /// counts as over budget for the whole sample. Returns the
    /// announcement to send if stream scale changed.
    pub fn note_frame_budget(
        &mut self,
        producer_queue_depth: u32,
        capture_queue_depth: u32,
        encode_latency: Duration,
    ) -> Option<StreamAnnouncement> {
        self.last_encode_latency = Some(encode_latency);
        if !self.adaptive_scale_enabled {
            return None;
        }
        let over_budget =
            producer_queue_depth > capture_queue_depth || encode_latency > self.target_frame_time();
        match self.adaptive_tracker.observe(over_budget) {
            Some(ScaleAdjustment::Reduce) => {
                let new_scale = self.update_stream_scale(self.stream_scale - ADAPTIVE_REDUCE_STEP);
                warn!(stream_id = self.stream_id, scale = new_scale, "reducing stream scale, sustained over-budget frames");
                Some(self.scale_announcement())
            }
            Some(ScaleAdjustment::Restore) => {
                if self.stream_scale >= MAX_SCALE {
                    return None;
                }
                let new_scale = self.update_stream_scale(self.stream_scale + ADAPTIVE_RESTORE_STEP);
                info!(stream_id = self.stream_id, scale = new_scale, "restoring stream scale, slack has returned");
                Some(self.scale_announcement())
            }
            None => None,
        }
    }

    fn scale_announcement(&self) -> StreamAnnouncement {
        let (width, height) = self.scaled_dimensions(self.encoder_config.width, self.encoder_config.height);
        StreamAnnouncement {
            stream_id: self.stream_id,
            dimension_token: self.dimension_token,
            width,
            height,
            frame_rate: self.encoder_config.fps,
        }
    }

    pub fn request_keyframe(&mut self) {
        info!(stream_id = self.stream_id, "keyframe requested");
    }

    /// Only valid in `capturing`: rebind to a new shared-display
    /// generation, replaying the last configured resolution.
    pub fn rebind_to_shared_display(&mut self, new_generation: u64) -> Result<(), StreamError> {
        if self.state != StreamState::Capturing {
            return Err(StreamError::InvalidTransition {
                from: self.state,
                action: "rebind_to_shared_display",
            });
        }
        self.shared_display_generation = Some(new_generation);
        Ok(())
    }

    pub fn note_frame_captured(&mut self) {
        self.last_captured_frame = Some(Instant::now());
    }

    #[must_use]
    pub fn seconds_since_last_frame(&self) -> Option<Duration> {
        self.last_captured_frame.map(|t| t.elapsed())
    }

    /// Record an encode failure. Returns `Err` once the circuit
    /// breaker trips, at which point the caller must transition to
    /// `stopping` and notify the client.
    pub fn note_encode_failure(&mut self) -> Result<(), StreamError> {
        if self.encode_failures.record() {
            warn!(stream_id = self.stream_id, "encode failure circuit breaker tripped");
            self.state = StreamState::Stopping;
            return Err(StreamError::EncodeFailuresExceeded);
        }
        Ok(())
    }

    pub fn note_encode_success(&mut self) {
        self.encode_failures.reset();
    }

    /// Idempotent: a second `stop()` is a no-op.
    pub fn stop(&mut self) {
        if self.state == StreamState::Stopped {
            return;
        }
        self.state = StreamState::Stopped;
        info!(stream_id = self.stream_id, "stream stopped");
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.startup.elapsed()
    }
}

fn round_even(value: f64) -> u32 {
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    {
        value.round_ties_even() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> StreamContext {
        StreamContext::new(1, 42, StreamFlags::default(), EncoderConfig::default())
    }

    #[test]
    fn frames_are_gated_until_registration() {
        let mut stream = ctx();
        stream.start().unwrap();
        assert!(!stream.may_emit_frames());
        stream.register();
        assert!(stream.may_emit_frames());
    }

    #[test]
    fn dimension_token_strictly_increases_on_distinct_resize() {
        let mut stream = ctx();
        stream.start().unwrap();
        stream.register();
        let a1 = stream.update_resolution(1920, 1080).unwrap();
        let a2 = stream.update_resolution(1280, 720).unwrap();
        assert!(a2.dimension_token > a1.dimension_token);
    }

    #[test]
    fn identical_resolution_produces_no_new_token() {
        let mut stream = ctx();
        stream.start().unwrap();
        stream.update_resolution(1920, 1080);
        let before = stream.dimension_token();
        let announcement = stream.update_resolution(1920, 1080);
        assert!(announcement.is_none());
        assert_eq!(stream.dimension_token(), before);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut stream = ctx();
        stream.stop();
        stream.stop();
        assert_eq!(stream.state(), StreamState::Stopped);
    }

    #[test]
    fn scale_is_clamped_to_valid_range() {
        let mut stream = ctx();
        assert_eq!(stream.update_stream_scale(5.0), MAX_SCALE);
        assert_eq!(stream.update_stream_scale(-1.0), MIN_SCALE);
    }

    #[test]
    fn circuit_breaker_trips_after_consecutive_failures() {
        let mut stream = ctx();
        stream.start().unwrap();
        stream.register();
        for _ in 0..ENCODE_FAILURE_LIMIT - 1 {
            assert!(stream.note_encode_failure().is_ok());
        }
        assert!(stream.note_encode_failure().is_err());
        assert_eq!(stream.state(), StreamState::Stopping);
    }

    #[test]
    fn sustained_over_budget_queue_depth_reduces_scale() {
        let mut stream = ctx();
        stream.start().unwrap();
        stream.register();
        let budget = stream.target_frame_time();
        let mut announced = None;
        for _ in 0..ADAPTIVE_REDUCE_STREAK {
            announced = stream.note_frame_budget(10, 3, budget);
        }
        assert!(announced.is_some());
        assert!(stream.stream_scale() < MAX_SCALE);
    }

    #[test]
    fn sustained_over_budget_latency_reduces_scale() {
        let mut stream = ctx();
        stream.start().unwrap();
        stream.register();
        let over_budget_latency = stream.target_frame_time() * 2;
        let mut announced = None;
        for _ in 0..ADAPTIVE_REDUCE_STREAK {
            announced = stream.note_frame_budget(0, 3, over_budget_latency);
        }
        assert!(announced.is_some());
        assert!(stream.stream_scale() < MAX_SCALE);
    }

    #[test]
    fn a_single_over_budget_sample_does_not_trip_it() {
        let mut stream = ctx();
        stream.start().unwrap();
        stream.register();
        let budget = stream.target_frame_time();
        assert!(stream.note_frame_budget(10, 3, budget * 2).is_none());
        assert_eq!(stream.stream_scale(), MAX_SCALE);
    }

    #[test]
    fn scale_restores_only_after_a_long_slack_streak() {
        let mut stream = ctx();
        stream.start().unwrap();
        stream.register();
        let budget = stream.target_frame_time();
        for _ in 0..ADAPTIVE_REDUCE_STREAK {
            stream.note_frame_budget(10, 3, budget * 2);
        }
        let reduced = stream.stream_scale();
        assert!(reduced < MAX_SCALE);

        for _ in 0..ADAPTIVE_RESTORE_STREAK - 1 {
            assert!(stream.note_frame_budget(0, 3, budget).is_none());
        }
        let announcement = stream.note_frame_budget(0, 3, budget);
        assert!(announcement.is_some());
        assert!(stream.stream_scale() > reduced);
    }

    #[test]
    fn adaptive_scale_disabled_never_adjusts() {
        let mut stream = ctx();
        stream.adaptive_scale_enabled = false;
        stream.start().unwrap();
        stream.register();
        let budget = stream.target_frame_time();
        for _ in 0..ADAPTIVE_REDUCE_STREAK * 2 {
            assert!(stream.note_frame_budget(10, 3, budget * 2).is_none());
        }
        assert_eq!(stream.stream_scale(), MAX_SCALE);
    }

    #[test]
    fn rebind_requires_capturing_state() {
        let mut stream = ctx();
        assert!(stream.rebind_to_shared_display(1).is_err());
        stream.start().unwrap();
        stream.register();
        assert!(stream.rebind_to_shared_display(1).is_ok());
    }
}
