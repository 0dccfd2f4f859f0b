//! Trackpad gesture translation into keyboard shortcuts (§4.J).
//!
//! macOS hosts have no native pinch-to-zoom or two-finger-rotate
//! input on a remote desktop, so magnify and rotate gestures are
//! translated into the nearest keyboard equivalent: accumulated
//! magnification crosses a threshold to emit Cmd+=/Cmd-, accumulated
//! rotation crosses a threshold to emit an alt-scroll tick.

use crate::{ModifierFlags, VirtualKeyCode};

const MAGNIFY_THRESHOLD: f64 = 0.08;
const ROTATE_THRESHOLD_DEGREES: f64 = 2.0;

/// A synthesized action to inject in response to accumulated gesture
/// magnitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureAction {
    ZoomIn,
    ZoomOut,
    AltScroll { dy: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GesturePhase {
    Began,
    Changed,
    Ended,
}

/// Accumulates magnify/rotate deltas and emits discrete actions once
/// the running total crosses a threshold, carrying the remainder
/// forward so gestures at exactly the threshold aren't lost.
pub struct GestureTranslator {
    magnify_accum: f64,
    rotate_accum: f64,
}

impl GestureTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            magnify_accum: 0.0,
            rotate_accum: 0.0,
        }
    }

    /// Feed a magnify delta (positive = pinch out/zoom in). Returns
    /// any actions crossed this update. On `Ended`, a partial
    /// accumulation past half the threshold still emits one action so
    /// a deliberate-but-short pinch isn't silently dropped.
    pub fn magnify(&mut self, delta: f64, phase: GesturePhase) -> Vec<GestureAction> {
        self.magnify_accum += delta;
        let mut actions = Vec::new();

        while self.magnify_accum.abs() >= MAGNIFY_THRESHOLD {
            if self.magnify_accum > 0.0 {
                actions.push(GestureAction::ZoomIn);
                self.magnify_accum -= MAGNIFY_THRESHOLD;
            } else {
                actions.push(GestureAction::ZoomOut);
                self.magnify_accum += MAGNIFY_THRESHOLD;
            }
        }

        if phase == GesturePhase::Ended {
            if self.magnify_accum.abs() >= MAGNIFY_THRESHOLD / 2.0 {
                actions.push(if self.magnify_accum > 0.0 {
                    GestureAction::ZoomIn
                } else {
                    GestureAction::ZoomOut
                });
            }
            self.magnify_accum = 0.0;
        }

        actions
    }

    /// Feed a rotation delta in degrees. Returns an alt-scroll action
    /// per full threshold crossed.
    pub fn rotate(&mut self, delta_degrees: f64, phase: GesturePhase) -> Vec<GestureAction> {
        self.rotate_accum += delta_degrees;
        let mut actions = Vec::new();

        while self.rotate_accum.abs() >= ROTATE_THRESHOLD_DEGREES {
            let dy = if self.rotate_accum > 0.0 { 1 } else { -1 };
            actions.push(GestureAction::AltScroll { dy });
            self.rotate_accum -= ROTATE_THRESHOLD_DEGREES.copysign(self.rotate_accum);
        }

        if phase == GesturePhase::Ended {
            if self.rotate_accum.abs() >= ROTATE_THRESHOLD_DEGREES / 2.0 {
                let dy = if self.rotate_accum > 0.0 { 1 } else { -1 };
                actions.push(GestureAction::AltScroll { dy });
            }
            self.rotate_accum = 0.0;
        }

        actions
    }
}

impl Default for GestureTranslator {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a [`GestureAction`] to the key code and modifier flags an
/// [`crate::InputInjector`] should synthesize.
#[must_use]
pub fn zoom_key_event(action: GestureAction) -> Option<(VirtualKeyCode, ModifierFlags)> {
    let flags = ModifierFlags {
        command: true,
        ..ModifierFlags::default()
    };
    match action {
        GestureAction::ZoomIn => Some((VirtualKeyCode(0x18), flags)), // '='
        GestureAction::ZoomOut => Some((VirtualKeyCode(0x1B), flags)), // '-'
        GestureAction::AltScroll { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnify_emits_zoom_in_past_threshold() {
        let mut gesture = GestureTranslator::new();
        let actions = gesture.magnify(0.1, GesturePhase::Changed);
        assert_eq!(actions, vec![GestureAction::ZoomIn]);
    }

    #[test]
    fn magnify_emits_zoom_out_for_negative_delta() {
        let mut gesture = GestureTranslator::new();
        let actions = gesture.magnify(-0.1, GesturePhase::Changed);
        assert_eq!(actions, vec![GestureAction::ZoomOut]);
    }

    #[test]
    fn magnify_ended_emits_partial_past_half_threshold() {
        let mut gesture = GestureTranslator::new();
        let actions = gesture.magnify(0.05, GesturePhase::Ended);
        assert_eq!(actions, vec![GestureAction::ZoomIn]);
    }

    #[test]
    fn magnify_ended_drops_below_half_threshold() {
        let mut gesture = GestureTranslator::new();
        let actions = gesture.magnify(0.02, GesturePhase::Ended);
        assert!(actions.is_empty());
    }

    #[test]
    fn rotate_emits_alt_scroll_past_threshold() {
        let mut gesture = GestureTranslator::new();
        let actions = gesture.rotate(3.0, GesturePhase::Changed);
        assert_eq!(actions, vec![GestureAction::AltScroll { dy: 1 }]);
    }

    #[test]
    fn rotate_accumulates_across_multiple_calls() {
        let mut gesture = GestureTranslator::new();
        assert!(gesture.rotate(1.5, GesturePhase::Changed).is_empty());
        let actions = gesture.rotate(1.0, GesturePhase::Changed);
        assert_eq!(actions, vec![GestureAction::AltScroll { dy: 1 }]);
    }
}
