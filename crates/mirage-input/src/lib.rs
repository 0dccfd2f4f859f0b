//! Input injection, pointer interpolation, scroll smoothing, modifier
//! accounting and gesture translation for the Mirage host streaming
//! engine (§4.J).
//!
//! The hot mouse/keyboard path never touches the OS directly — the
//! engine only knows the [`InputInjector`] trait. A concrete backend
//! (out of scope for this crate) synthesizes real HID events.

pub mod cache;
pub mod controller;
pub mod gesture;
pub mod modifiers;
pub mod pointer;
pub mod scroll;

pub use cache::{InputStreamCache, WindowFrame};
pub use controller::{InputController, MouseInputEvent, TrafficLightRegion};
pub use gesture::{GestureAction, GestureTranslator};
pub use modifiers::{ModifierEvent, ModifierFlags, ModifierTracker};
pub use pointer::PointerInterpolator;
pub use scroll::{ScrollPhase, ScrollSmoother};

use std::fmt;

/// Identifies a stream for the hot input path. Mirrors the wire
/// protocol's `u16` stream id (§4.A) without depending on the protocol
/// crate, since input dispatch must stay independent of control-plane
/// message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u16);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the connected client that owns a stream's input focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub uuid::Uuid);

/// A virtual/platform key code. The engine treats this as opaque —
/// the input-injection backend is responsible for any further mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualKeyCode(pub u16);

/// Mouse buttons the engine can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Errors the input-injection backend may report.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("input backend unavailable: {0}")]
    Unavailable(String),
    #[error("input backend error: {0}")]
    Backend(String),
}

/// Input-injection collaborator contract (§6: "OS input facility").
///
/// All coordinates are in host display pixels. Implementations are
/// expected to be cheap to call repeatedly (the pointer/scroll timers
/// call these at up to ~120 Hz).
pub trait InputInjector: Send {
    fn warp_cursor(&mut self, x: f64, y: f64) -> Result<(), InputError>;
    fn mouse_move(&mut self, x: f64, y: f64) -> Result<(), InputError>;
    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), InputError>;
    fn scroll(&mut self, dx: i32, dy: i32, alt: bool) -> Result<(), InputError>;
    fn key_event(&mut self, code: VirtualKeyCode, pressed: bool) -> Result<(), InputError>;
    fn flags_changed(&mut self, flags: ModifierFlags) -> Result<(), InputError>;
    /// Query the OS's current modifier state, for the force-clear
    /// reconciliation described in §4.J.
    fn query_modifier_state(&mut self) -> Result<ModifierFlags, InputError>;
}
