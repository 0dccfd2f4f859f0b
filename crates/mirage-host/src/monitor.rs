//! Monitoring (§4.L): cursor shape/position polling, window-activity
//! throttling, and menu-bar mirroring.

use std::time::Duration;

use mirage_capture::WindowHandle;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("window no longer exists")]
    WindowGone,
    #[error("activation backend error: {0}")]
    Backend(String),
}

/// Brings a window to the front (§4.L; resolves the "what happens
/// when the active window closes" open question). Mirage defines one
/// method and does not chain fallback strategies itself — a caller
/// that wants "try the last window, then the app icon" composes that
/// behind its own implementation of this trait.
pub trait WindowActivation: Send {
    fn activate(&mut self, handle: WindowHandle) -> Result<(), ActivationError>;
}

/// Cursor-shape polling cadence, per active stream.
pub const CURSOR_POLL_HZ: u32 = 30;
pub const CURSOR_POLL_INTERVAL: Duration = Duration::from_millis(1000 / CURSOR_POLL_HZ as u64);

/// Frame rate applied to a stream whose application has lost focus.
pub const BACKGROUND_FPS: u32 = 1;

/// Throttles a stream's frame rate based on whether its application
/// is frontmost, requesting a keyframe on regaining focus so the
/// client doesn't have to wait for the next natural IDR.
pub struct WindowActivityMonitor {
    configured_fps: u32,
    is_frontmost: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityDecision {
    pub target_fps: u32,
    pub request_keyframe: bool,
}

impl WindowActivityMonitor {
    #[must_use]
    pub fn new(configured_fps: u32) -> Self {
        Self {
            configured_fps,
            is_frontmost: true,
        }
    }

    /// Report an observed frontmost-state change. Returns the
    /// resulting decision, or `None` if the state didn't actually
    /// change (no-op).
    pub fn report_frontmost(&mut self, is_frontmost: bool) -> Option<ActivityDecision> {
        if is_frontmost == self.is_frontmost {
            return None;
        }
        self.is_frontmost = is_frontmost;
        Some(if is_frontmost {
            debug!("window regained focus, restoring configured fps");
            ActivityDecision {
                target_fps: self.configured_fps,
                request_keyframe: true,
            }
        } else {
            debug!("window lost focus, throttling to background fps");
            ActivityDecision {
                target_fps: BACKGROUND_FPS,
                request_keyframe: false,
            }
        })
    }

    #[must_use]
    pub fn is_frontmost(&self) -> bool {
        self.is_frontmost
    }
}

/// A node in the frontmost app's menu tree, diffed against the
/// previous snapshot to produce `menuBarUpdate` deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuNode {
    pub id: u32,
    pub title: String,
    pub enabled: bool,
    pub children: Vec<MenuNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuDiff {
    Added(MenuNode),
    Removed(u32),
    Changed(MenuNode),
}

/// Snapshots the frontmost app's menu tree and computes diffs against
/// the previous snapshot.
pub struct MenuBarMonitor {
    previous: Vec<MenuNode>,
}

impl MenuBarMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self { previous: Vec::new() }
    }

    pub fn diff(&mut self, current: Vec<MenuNode>) -> Vec<MenuDiff> {
        let mut diffs = Vec::new();
        for node in &current {
            match self.previous.iter().find(|p| p.id == node.id) {
                None => diffs.push(MenuDiff::Added(node.clone())),
                Some(prev) if prev != node => diffs.push(MenuDiff::Changed(node.clone())),
                Some(_) => {}
            }
        }
        for prev in &self.previous {
            if !current.iter().any(|n| n.id == prev.id) {
                diffs.push(MenuDiff::Removed(prev.id));
            }
        }
        self.previous = current;
        diffs
    }
}

impl Default for MenuBarMonitor {
    fn default() -> Self {
        Self::new()
    }
}
