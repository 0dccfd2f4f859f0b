//! Capture-source abstraction consumed by the Mirage host streaming engine.
//!
//! The host never talks to `ScreenCaptureKit` (or any other platform
//! capture API) directly — it only knows the [`CaptureSource`] trait.
//! A concrete implementation (out of scope for this crate) turns a
//! [`CaptureTarget`] into a stream of [`CaptureEvent`]s.

pub mod frame;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use frame::{
    AudioChunk, CaptureEvent, CapturedFrame, CursorBitmap, CursorInfo, DamageRect, PixelFormat,
};

/// Opaque window handle, as reported by the (out of scope) window
/// enumeration collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowHandle(pub u32);

/// Opaque application handle (bundle-identifier-keyed process), as
/// reported by the (out of scope) app enumeration collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppHandle(pub u32);

/// Opaque physical or virtual display handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayHandle(pub u32);

/// What a [`CaptureSource`] should capture, per §6 of the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTarget {
    /// A single application window.
    Window(WindowHandle),
    /// An application, rendered onto a given display (used for app
    /// streams that should follow window creation on a particular
    /// output).
    App(AppHandle, DisplayHandle),
    /// A full display (physical or the shared virtual display).
    Display(DisplayHandle),
}

/// Capture pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConfig {
    /// Maximum number of frames the capture backend may buffer before
    /// a producer is considered over budget (used by adaptive scale,
    /// §4.F).
    pub queue_depth: u32,
    /// Target frames per second. The capture backend is not required
    /// to hit this exactly; it is a ceiling.
    pub target_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_depth: 3,
            target_fps: 60,
        }
    }
}

/// Errors a [`CaptureSource`] may report.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The OS denied screen-recording permission (or similar).
    #[error("capture permission denied")]
    PermissionDenied,
    /// The requested target no longer exists (window closed, display
    /// unplugged, etc.).
    #[error("capture target not found")]
    TargetNotFound,
    /// Any other backend-specific failure.
    #[error("capture backend error: {0}")]
    Backend(String),
}

/// Capture-source collaborator contract (§6).
///
/// A conforming implementation produces [`CaptureEvent`]s on the
/// returned channel until [`CaptureSource::stop`] is called or the
/// handle is dropped. Frames produced before the caller has finished
/// wiring up a consumer are the caller's responsibility to discard —
/// the trait itself makes no promises about buffering before the first
/// `recv()`.
#[async_trait]
pub trait CaptureSource: Send {
    /// Begin capturing `target` with the given `config`, returning a
    /// channel of capture events.
    async fn start(
        &mut self,
        target: CaptureTarget,
        config: CaptureConfig,
    ) -> Result<mpsc::Receiver<CaptureEvent>, CaptureError>;

    /// Stop capturing. Idempotent: calling `stop` on an already-stopped
    /// source is a no-op.
    async fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_capture_config_has_sane_queue_depth() {
        let config = CaptureConfig::default();
        assert!(config.queue_depth > 0);
        assert!(config.target_fps > 0);
    }

    #[test]
    fn capture_targets_are_distinguishable() {
        let w = CaptureTarget::Window(WindowHandle(1));
        let d = CaptureTarget::Display(DisplayHandle(1));
        assert_ne!(w, d);
    }
}
