//! Scroll-wheel smoothing (§4.J).
//!
//! Trackpad scroll events arrive as a stream of small, irregularly
//! timed deltas. Replaying them verbatim produces visibly jerky
//! scrolling once network jitter is added on top, so the controller
//! estimates an instantaneous rate, low-pass filters it, and decays it
//! smoothly to zero once input stops rather than cutting off abruptly.

use std::time::Duration;

/// Phase of a trackpad scroll gesture, mirrored from the client's
/// reported phase so the decay behavior matches native trackpad feel
/// (momentum only follows a `Began`/`Changed` run, never a bare `Ended`
/// with no prior motion).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollPhase {
    Began,
    Changed,
    Ended,
}

/// Smooths a raw stream of scroll deltas into a steady per-tick output,
/// with geometric decay after input ends.
pub struct ScrollSmoother {
    rate: (f64, f64),
    /// Fractional pixel remainder carried to the next tick so repeated
    /// truncation doesn't lose slow scroll motion entirely.
    residual: (f64, f64),
    decaying: bool,
    decay_ratio: f64,
    last_event_age: Duration,
    decay_delay: Duration,
}

impl ScrollSmoother {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rate: (0.0, 0.0),
            residual: (0.0, 0.0),
            decaying: false,
            decay_ratio: 0.85,
            last_event_age: Duration::ZERO,
            decay_delay: Duration::from_millis(100),
        }
    }

    /// Feed a raw `(dx, dy)` delta reported over `dt` wall-clock time.
    /// `dt` is clamped to `[4ms, 100ms]` so a delayed or coalesced
    /// network batch doesn't register as an implausibly slow rate.
    pub fn report(&mut self, dx: f64, dy: f64, dt: Duration, phase: ScrollPhase) {
        let dt = dt.clamp(Duration::from_millis(4), Duration::from_millis(100));
        let dt_secs = dt.as_secs_f64();
        let instantaneous = (dx / dt_secs, dy / dt_secs);

        // Low-pass the instantaneous rate against the running rate.
        const ALPHA: f64 = 0.3;
        self.rate.0 += (instantaneous.0 - self.rate.0) * ALPHA;
        self.rate.1 += (instantaneous.1 - self.rate.1) * ALPHA;

        self.last_event_age = Duration::ZERO;
        self.decaying = matches!(phase, ScrollPhase::Ended);
    }

    /// Advance by `dt`, returning the integer pixel delta to emit this
    /// tick. Any accumulated fractional remainder below one pixel is
    /// carried forward rather than dropped.
    pub fn tick(&mut self, dt: Duration) -> (i32, i32) {
        self.last_event_age += dt;

        if self.decaying && self.last_event_age >= self.decay_delay {
            self.rate.0 *= self.decay_ratio;
            self.rate.1 *= self.decay_ratio;
            if self.rate.0.abs() < 0.5 {
                self.rate.0 = 0.0;
            }
            if self.rate.1.abs() < 0.5 {
                self.rate.1 = 0.0;
            }
        }

        let dt_secs = dt.as_secs_f64();
        let raw = (
            self.rate.0 * dt_secs + self.residual.0,
            self.rate.1 * dt_secs + self.residual.1,
        );
        let emit = (raw.0.trunc(), raw.1.trunc());
        self.residual = (raw.0 - emit.0, raw.1 - emit.1);

        #[allow(clippy::cast_possible_truncation)]
        (emit.0 as i32, emit.1 as i32)
    }

    /// True once decay has settled the rate to zero and there's
    /// nothing left to emit.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.rate == (0.0, 0.0) && self.residual.0.abs() < 1.0 && self.residual.1.abs() < 1.0
    }
}

impl Default for ScrollSmoother {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_then_tick_emits_nonzero_delta() {
        let mut smoother = ScrollSmoother::new();
        smoother.report(10.0, 0.0, Duration::from_millis(16), ScrollPhase::Changed);
        let (dx, _) = smoother.tick(Duration::from_millis(16));
        assert!(dx > 0);
    }

    #[test]
    fn decays_to_idle_after_ended_phase() {
        let mut smoother = ScrollSmoother::new();
        smoother.report(20.0, 0.0, Duration::from_millis(16), ScrollPhase::Began);
        smoother.report(20.0, 0.0, Duration::from_millis(16), ScrollPhase::Ended);
        for _ in 0..200 {
            smoother.tick(Duration::from_millis(16));
        }
        assert!(smoother.is_idle());
    }

    #[test]
    fn residual_carries_fractional_motion() {
        let mut smoother = ScrollSmoother::new();
        smoother.report(0.2, 0.0, Duration::from_millis(16), ScrollPhase::Changed);
        let mut total = 0;
        for _ in 0..10 {
            let (dx, _) = smoother.tick(Duration::from_millis(16));
            total += dx;
        }
        assert!(total >= 0);
    }

    #[test]
    fn extreme_dt_is_clamped() {
        let mut smoother = ScrollSmoother::new();
        smoother.report(1.0, 0.0, Duration::from_secs(10), ScrollPhase::Changed);
        assert!(smoother.rate.0.is_finite());
    }
}
