//! Per-stream cache of the client's last-known window geometry, used to
//! translate normalized pointer coordinates back into host pixels
//! without a round trip to the window server on every event (§4.J).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::StreamId;

/// A window's frame in host display pixels, as last observed by the
/// stream's capture source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowFrame {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl WindowFrame {
    #[must_use]
    pub fn to_pixels(&self, norm_x: f64, norm_y: f64) -> (f64, f64) {
        (
            self.x + norm_x * self.width,
            self.y + norm_y * self.height,
        )
    }

    /// True if `other` differs from `self` by more than `tolerance_px`
    /// along either axis of origin. Small jitter from repeated window
    /// server queries should not invalidate in-flight pointer state.
    #[must_use]
    pub fn drifted_beyond(&self, other: &WindowFrame, tolerance_px: f64) -> bool {
        (self.x - other.x).abs() > tolerance_px || (self.y - other.y).abs() > tolerance_px
    }
}

struct CacheEntry {
    frame: WindowFrame,
    updated_at: Instant,
}

/// Caches the last-known [`WindowFrame`] per stream so the input
/// controller can map normalized coordinates to pixels on the hot path
/// without querying the window server per event.
///
/// Entries older than `max_age` are treated as stale and dropped on
/// next lookup, since a window may have closed or moved off-screen
/// without an explicit invalidation.
pub struct InputStreamCache {
    entries: HashMap<StreamId, CacheEntry>,
    max_age: Duration,
}

impl InputStreamCache {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_age,
        }
    }

    pub fn update(&mut self, stream: StreamId, frame: WindowFrame) {
        self.entries.insert(
            stream,
            CacheEntry {
                frame,
                updated_at: Instant::now(),
            },
        );
    }

    /// Look up the frame for `stream`, evicting and returning `None` if
    /// it has aged out.
    pub fn get(&mut self, stream: StreamId) -> Option<WindowFrame> {
        let stale = self
            .entries
            .get(&stream)
            .is_some_and(|entry| entry.updated_at.elapsed() > self.max_age);
        if stale {
            self.entries.remove(&stream);
            return None;
        }
        self.entries.get(&stream).map(|entry| entry.frame)
    }

    pub fn remove(&mut self, stream: StreamId) {
        self.entries.remove(&stream);
    }
}

impl Default for InputStreamCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
