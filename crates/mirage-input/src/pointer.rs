//! Pointer position interpolation (§4.J).
//!
//! The client reports pointer positions at its own event rate, which
//! can be bursty or sparse depending on network conditions. A
//! low-pass filter running on an independent ~120 Hz tick smooths the
//! cursor's on-screen motion between reports instead of warping it
//! directly to each new sample.

use std::time::Duration;

/// Exponential low-pass filter driving cursor position towards a
/// target, with a short settle so the cursor comes to a visible rest
/// instead of asymptotically crawling forever.
pub struct PointerInterpolator {
    current: (f64, f64),
    target: (f64, f64),
    /// Time constant of the low-pass filter.
    tau: Duration,
    /// Once the distance to target is below this, snap directly
    /// instead of continuing to interpolate.
    snap_threshold_px: f64,
    /// Once within `snap_threshold_px` for this long, stop ticking.
    stop_delay: Duration,
    settled_for: Duration,
}

impl PointerInterpolator {
    #[must_use]
    pub fn new(initial: (f64, f64), tau: Duration) -> Self {
        Self {
            current: initial,
            target: initial,
            tau,
            snap_threshold_px: 0.5,
            stop_delay: Duration::from_millis(50),
            settled_for: Duration::ZERO,
        }
    }

    pub fn set_target(&mut self, target: (f64, f64)) {
        self.target = target;
        self.settled_for = Duration::ZERO;
    }

    #[must_use]
    pub fn current(&self) -> (f64, f64) {
        self.current
    }

    /// True once the cursor has settled at `target` and stopped
    /// ticking; callers can skip redundant warp calls.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.settled_for >= self.stop_delay
    }

    /// Advance the filter by `dt` and return the new current position.
    ///
    /// `alpha = dt / tau` clamped to `[0, 1]` — a `dt` far larger than
    /// `tau` (a stalled tick loop) snaps straight to target rather
    /// than overshooting the filter's stability range.
    pub fn tick(&mut self, dt: Duration) -> (f64, f64) {
        let dx = self.target.0 - self.current.0;
        let dy = self.target.1 - self.current.1;
        let dist = dx.hypot(dy);

        if dist <= self.snap_threshold_px {
            self.current = self.target;
            self.settled_for += dt;
            return self.current;
        }

        self.settled_for = Duration::ZERO;
        let alpha = if self.tau.is_zero() {
            1.0
        } else {
            (dt.as_secs_f64() / self.tau.as_secs_f64()).clamp(0.0, 1.0)
        };
        self.current.0 += dx * alpha;
        self.current.1 += dy * alpha;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_moves_toward_target_without_overshoot() {
        let mut interp = PointerInterpolator::new((0.0, 0.0), Duration::from_millis(100));
        interp.set_target((100.0, 0.0));
        let mut pos = (0.0, 0.0);
        for _ in 0..50 {
            pos = interp.tick(Duration::from_millis(8));
        }
        assert!(pos.0 > 0.0 && pos.0 <= 100.0);
    }

    #[test]
    fn snap_threshold_avoids_infinite_creep() {
        let mut interp = PointerInterpolator::new((99.8, 0.0), Duration::from_millis(100));
        interp.set_target((100.0, 0.0));
        let pos = interp.tick(Duration::from_millis(8));
        assert_eq!(pos, (100.0, 0.0));
    }

    #[test]
    fn settles_after_stop_delay() {
        let mut interp = PointerInterpolator::new((100.0, 100.0), Duration::from_millis(100));
        interp.set_target((100.0, 100.0));
        assert!(!interp.is_settled());
        for _ in 0..10 {
            interp.tick(Duration::from_millis(8));
        }
        assert!(interp.is_settled());
    }

    #[test]
    fn stalled_tick_snaps_instead_of_overshooting() {
        let mut interp = PointerInterpolator::new((0.0, 0.0), Duration::from_millis(16));
        interp.set_target((50.0, 0.0));
        let pos = interp.tick(Duration::from_secs(2));
        assert_eq!(pos, (50.0, 0.0));
    }
}
