//! Per-stream input dispatch: ties the window-frame cache, pointer
//! interpolator, scroll smoother, modifier tracker and gesture
//! translator to a concrete [`InputInjector`] (§4.J, §5).
//!
//! Runs on the dedicated input-dispatch task so the hot mouse/keyboard
//! path is never starved by control-plane work on the host command
//! channel (SPEC_FULL §5).

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::{InputStreamCache, WindowFrame};
use crate::gesture::{zoom_key_event, GesturePhase, GestureTranslator};
use crate::modifiers::{ModifierFlagBit, ModifierTracker};
use crate::pointer::PointerInterpolator;
use crate::scroll::{ScrollPhase, ScrollSmoother};
use crate::{InputError, InputInjector, MouseButton, StreamId, VirtualKeyCode};

/// The 80x30px region at a window's top-left corner where a
/// left-mouse-down is suppressed instead of forwarded, so the client
/// can't accidentally close/minimize the host's own window chrome
/// through the remote session (testable property: traffic-light
/// suppression).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrafficLightRegion {
    pub width: f64,
    pub height: f64,
}

impl Default for TrafficLightRegion {
    fn default() -> Self {
        Self {
            width: 80.0,
            height: 30.0,
        }
    }
}

impl TrafficLightRegion {
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && x < self.width && y >= 0.0 && y < self.height
    }
}

/// A mouse input event as reported by the client, in normalized
/// window-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MouseInputEvent {
    Move { norm_x: f64, norm_y: f64 },
    Button { button: MouseButton, pressed: bool, norm_x: f64, norm_y: f64 },
    Scroll { dx: f64, dy: f64, dt: Duration, phase: ScrollPhase },
}

struct StreamState {
    interpolator: PointerInterpolator,
    scroll: ScrollSmoother,
    modifiers: ModifierTracker,
    gestures: GestureTranslator,
}

impl StreamState {
    fn new() -> Self {
        Self {
            interpolator: PointerInterpolator::new((0.0, 0.0), Duration::from_millis(16)),
            scroll: ScrollSmoother::new(),
            modifiers: ModifierTracker::new(),
            gestures: GestureTranslator::new(),
        }
    }
}

/// Drives input for every active stream against a single
/// [`InputInjector`] backend.
///
/// The window-frame cache tolerates up to 2px of drift between
/// reports before treating a stream's geometry as stale, since the
/// window server and the capture pipeline don't always agree to the
/// pixel on a given poll.
pub struct InputController<I: InputInjector> {
    injector: I,
    cache: InputStreamCache,
    streams: HashMap<StreamId, StreamState>,
    traffic_light: TrafficLightRegion,
    drift_tolerance_px: f64,
}

impl<I: InputInjector> InputController<I> {
    #[must_use]
    pub fn new(injector: I) -> Self {
        Self {
            injector,
            cache: InputStreamCache::default(),
            streams: HashMap::new(),
            traffic_light: TrafficLightRegion::default(),
            drift_tolerance_px: 2.0,
        }
    }

    pub fn register_stream(&mut self, stream: StreamId, frame: WindowFrame) {
        self.cache.update(stream, frame);
        self.streams.insert(stream, StreamState::new());
    }

    pub fn unregister_stream(&mut self, stream: StreamId) {
        self.cache.remove(stream);
        self.streams.remove(&stream);
    }

    /// Update a stream's window geometry. Small moves under
    /// `drift_tolerance_px` are absorbed without logging; a genuine
    /// move or resize is logged at debug for diagnosability.
    pub fn update_frame(&mut self, stream: StreamId, frame: WindowFrame) {
        if let Some(previous) = self.cache.get(stream) {
            if previous.drifted_beyond(&frame, self.drift_tolerance_px) {
                debug!(stream = %stream, "window frame moved");
            }
        }
        self.cache.update(stream, frame);
    }

    /// Dispatch a mouse event for `stream`. Returns `Ok(true)` if the
    /// event was forwarded, `Ok(false)` if it was suppressed (traffic
    /// light region).
    pub fn handle_mouse(
        &mut self,
        stream: StreamId,
        event: MouseInputEvent,
    ) -> Result<bool, InputError> {
        let Some(frame) = self.cache.get(stream) else {
            warn!(stream = %stream, "mouse event for stream with no known frame");
            return Ok(false);
        };
        let Some(state) = self.streams.get_mut(&stream) else {
            return Ok(false);
        };

        match event {
            MouseInputEvent::Move { norm_x, norm_y } => {
                let (px, py) = frame.to_pixels(norm_x, norm_y);
                state.interpolator.set_target((px, py));
                Ok(true)
            }
            MouseInputEvent::Button {
                button,
                pressed,
                norm_x,
                norm_y,
            } => {
                let (px, py) = frame.to_pixels(norm_x, norm_y);
                if button == MouseButton::Left
                    && pressed
                    && self.traffic_light.contains(px - frame.x, py - frame.y)
                {
                    return Ok(false);
                }
                if pressed {
                    self.injector.warp_cursor(px, py)?;
                }
                self.injector.mouse_button(button, pressed)?;
                Ok(true)
            }
            MouseInputEvent::Scroll { dx, dy, dt, phase } => {
                state.scroll.report(dx, dy, dt, phase);
                Ok(true)
            }
        }
    }

    /// Dispatch a raw key event, routing modifier keys through the
    /// held-state tracker and everything else straight to the
    /// injector.
    pub fn handle_key(
        &mut self,
        stream: StreamId,
        code: VirtualKeyCode,
        pressed: bool,
        to_modifier: impl Fn(VirtualKeyCode) -> Option<ModifierFlagBit>,
    ) -> Result<(), InputError> {
        let Some(state) = self.streams.get_mut(&stream) else {
            return Ok(());
        };
        if let Some(event) = state.modifiers.key_changed(code, pressed, to_modifier) {
            self.injector.flags_changed(event.flags)?;
        } else {
            self.injector.key_event(code, pressed)?;
        }
        Ok(())
    }

    pub fn handle_magnify(
        &mut self,
        stream: StreamId,
        delta: f64,
        phase: GesturePhase,
    ) -> Result<(), InputError> {
        let Some(state) = self.streams.get_mut(&stream) else {
            return Ok(());
        };
        for action in state.gestures.magnify(delta, phase) {
            if let Some((code, flags)) = zoom_key_event(action) {
                self.injector.flags_changed(flags)?;
                self.injector.key_event(code, true)?;
                self.injector.key_event(code, false)?;
                self.injector.flags_changed(Default::default())?;
            }
        }
        Ok(())
    }

    pub fn handle_rotate(
        &mut self,
        stream: StreamId,
        delta_degrees: f64,
        phase: GesturePhase,
    ) -> Result<(), InputError> {
        let Some(state) = self.streams.get_mut(&stream) else {
            return Ok(());
        };
        for action in state.gestures.rotate(delta_degrees, phase) {
            if let crate::gesture::GestureAction::AltScroll { dy } = action {
                self.injector.scroll(0, dy, true)?;
            }
        }
        Ok(())
    }

    /// Advance every stream's pointer/scroll/modifier timers by `dt`
    /// and flush the resulting injector calls. Intended to be driven
    /// by a ~120 Hz (8ms) ticker.
    pub fn tick(&mut self, dt: Duration) -> Result<(), InputError> {
        for state in self.streams.values_mut() {
            if !state.interpolator.is_settled() {
                let (x, y) = state.interpolator.tick(dt);
                self.injector.mouse_move(x, y)?;
            }
            if !state.scroll.is_idle() {
                let (dx, dy) = state.scroll.tick(dt);
                if dx != 0 || dy != 0 {
                    self.injector.scroll(dx, dy, false)?;
                }
            }
            if let Some(event) = state.modifiers.tick(dt) {
                self.injector.flags_changed(event.flags)?;
            }
        }
        Ok(())
    }

    /// Force-clear all modifier state for `stream` (disconnect, pause,
    /// or stop). Also reconciles against the OS's reported state so a
    /// race between a legitimate key-down and the clear doesn't leave
    /// a stray flag behind.
    pub fn clear_modifiers(&mut self, stream: StreamId) -> Result<(), InputError> {
        if let Some(state) = self.streams.get_mut(&stream) {
            state.modifiers.clear_all();
        }
        self.injector.flags_changed(Default::default())?;
        let os_flags = self.injector.query_modifier_state()?;
        if !os_flags.is_empty() {
            warn!("OS modifier state non-empty after clear; forcing flags-changed");
            self.injector.flags_changed(Default::default())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModifierFlags;

    struct FakeInjector {
        calls: Vec<String>,
    }

    impl FakeInjector {
        fn new() -> Self {
            Self { calls: Vec::new() }
        }
    }

    impl InputInjector for FakeInjector {
        fn warp_cursor(&mut self, x: f64, y: f64) -> Result<(), InputError> {
            self.calls.push(format!("warp {x} {y}"));
            Ok(())
        }
        fn mouse_move(&mut self, x: f64, y: f64) -> Result<(), InputError> {
            self.calls.push(format!("move {x} {y}"));
            Ok(())
        }
        fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), InputError> {
            self.calls.push(format!("button {button:?} {pressed}"));
            Ok(())
        }
        fn scroll(&mut self, dx: i32, dy: i32, alt: bool) -> Result<(), InputError> {
            self.calls.push(format!("scroll {dx} {dy} {alt}"));
            Ok(())
        }
        fn key_event(&mut self, code: VirtualKeyCode, pressed: bool) -> Result<(), InputError> {
            self.calls.push(format!("key {} {pressed}", code.0));
            Ok(())
        }
        fn flags_changed(&mut self, flags: ModifierFlags) -> Result<(), InputError> {
            self.calls.push(format!("flags {flags:?}"));
            Ok(())
        }
        fn query_modifier_state(&mut self) -> Result<ModifierFlags, InputError> {
            Ok(ModifierFlags::default())
        }
    }

    fn frame() -> WindowFrame {
        WindowFrame {
            x: 0.0,
            y: 0.0,
            width: 1000.0,
            height: 800.0,
        }
    }

    #[test]
    fn traffic_light_region_suppresses_left_click() {
        let mut controller = InputController::new(FakeInjector::new());
        controller.register_stream(StreamId(1), frame());
        let forwarded = controller
            .handle_mouse(
                StreamId(1),
                MouseInputEvent::Button {
                    button: MouseButton::Left,
                    pressed: true,
                    norm_x: 0.01,
                    norm_y: 0.01,
                },
            )
            .unwrap();
        assert!(!forwarded);
    }

    #[test]
    fn click_outside_traffic_light_is_forwarded() {
        let mut controller = InputController::new(FakeInjector::new());
        controller.register_stream(StreamId(1), frame());
        let forwarded = controller
            .handle_mouse(
                StreamId(1),
                MouseInputEvent::Button {
                    button: MouseButton::Left,
                    pressed: true,
                    norm_x: 0.5,
                    norm_y: 0.5,
                },
            )
            .unwrap();
        assert!(forwarded);
    }

    #[test]
    fn button_up_does_not_warp_the_cursor() {
        let mut controller = InputController::new(FakeInjector::new());
        controller.register_stream(StreamId(1), frame());
        controller
            .handle_mouse(
                StreamId(1),
                MouseInputEvent::Button {
                    button: MouseButton::Left,
                    pressed: false,
                    norm_x: 0.5,
                    norm_y: 0.5,
                },
            )
            .unwrap();
        assert!(controller.injector.calls.iter().all(|c| !c.starts_with("warp")));
        assert!(controller.injector.calls.iter().any(|c| c.starts_with("button")));
    }

    #[test]
    fn unknown_stream_mouse_event_is_ignored() {
        let mut controller = InputController::new(FakeInjector::new());
        let forwarded = controller
            .handle_mouse(StreamId(99), MouseInputEvent::Move { norm_x: 0.0, norm_y: 0.0 })
            .unwrap();
        assert!(!forwarded);
    }

    #[test]
    fn tick_drains_pointer_motion_into_injector() {
        let mut controller = InputController::new(FakeInjector::new());
        controller.register_stream(StreamId(1), frame());
        controller
            .handle_mouse(StreamId(1), MouseInputEvent::Move { norm_x: 1.0, norm_y: 1.0 })
            .unwrap();
        controller.tick(Duration::from_millis(8)).unwrap();
        assert!(controller.injector.calls.iter().any(|c| c.starts_with("move")));
    }
}
