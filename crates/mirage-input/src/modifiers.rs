//! Modifier key accounting and stuck-key recovery (§4.J).
//!
//! The client reports individual key down/up events; the host instead
//! needs to synthesize OS-level "flags changed" events carrying the
//! cumulative modifier state. A dropped key-up (client crash,
//! disconnect mid-chord, lost packet) must not leave a modifier
//! wedged down forever, so each held modifier is watched by a
//! staleness timer that force-clears it.

use std::time::Duration;

use crate::VirtualKeyCode;

/// Cumulative modifier state, bitflag-style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModifierFlags {
    pub shift: bool,
    pub control: bool,
    pub option: bool,
    pub command: bool,
}

impl ModifierFlags {
    #[must_use]
    pub fn is_empty(self) -> bool {
        self == Self::default()
    }
}

/// A change to emit to the [`crate::InputInjector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModifierEvent {
    pub flags: ModifierFlags,
}

struct HeldKey {
    code: VirtualKeyCode,
    held_for: Duration,
}

/// Tracks which modifier keys are currently held, diffs them against
/// each reported change, and force-clears any that go stale.
pub struct ModifierTracker {
    held: Vec<HeldKey>,
    flags: ModifierFlags,
    staleness_limit: Duration,
}

impl ModifierTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            held: Vec::new(),
            flags: ModifierFlags::default(),
            staleness_limit: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn flags(&self) -> ModifierFlags {
        self.flags
    }

    /// Record a modifier-key down/up and return the emitted event if
    /// the cumulative flags changed.
    pub fn key_changed(
        &mut self,
        code: VirtualKeyCode,
        pressed: bool,
        to_flag: impl Fn(VirtualKeyCode) -> Option<ModifierFlagBit>,
    ) -> Option<ModifierEvent> {
        let Some(bit) = to_flag(code) else {
            return None;
        };

        if pressed {
            if !self.held.iter().any(|k| k.code == code) {
                self.held.push(HeldKey {
                    code,
                    held_for: Duration::ZERO,
                });
            }
        } else {
            self.held.retain(|k| k.code != code);
        }

        let before = self.flags;
        self.recompute(bit, pressed);
        if self.flags == before {
            None
        } else {
            Some(ModifierEvent { flags: self.flags })
        }
    }

    fn recompute(&mut self, bit: ModifierFlagBit, pressed: bool) {
        let target = match bit {
            ModifierFlagBit::Shift => &mut self.flags.shift,
            ModifierFlagBit::Control => &mut self.flags.control,
            ModifierFlagBit::Option => &mut self.flags.option,
            ModifierFlagBit::Command => &mut self.flags.command,
        };
        *target = pressed;
    }

    /// Advance held-key timers by `dt`; any key held past the
    /// staleness limit is force-released and its event returned.
    pub fn tick(&mut self, dt: Duration) -> Option<ModifierEvent> {
        let mut stale = Vec::new();
        for key in &mut self.held {
            key.held_for += dt;
            if key.held_for >= self.staleness_limit {
                stale.push(key.code);
            }
        }
        if stale.is_empty() {
            return None;
        }
        self.held.retain(|k| !stale.contains(&k.code));
        if self.held.is_empty() {
            self.clear_all();
        }
        Some(ModifierEvent { flags: self.flags })
    }

    /// Unconditionally clear all modifier state, e.g. on stream
    /// stop/disconnect.
    pub fn clear_all(&mut self) -> ModifierEvent {
        self.held.clear();
        self.flags = ModifierFlags::default();
        ModifierEvent { flags: self.flags }
    }

    /// Reconcile against an OS-reported modifier state (from
    /// [`crate::InputInjector::query_modifier_state`]), adopting it as
    /// ground truth. Used when the tracker's internal state may have
    /// drifted from reality (e.g. after a force-clear raced with a
    /// legitimate key-down).
    pub fn reconcile(&mut self, os_flags: ModifierFlags) -> Option<ModifierEvent> {
        if self.flags == os_flags {
            return None;
        }
        self.flags = os_flags;
        if os_flags.is_empty() {
            self.held.clear();
        }
        Some(ModifierEvent { flags: self.flags })
    }
}

impl Default for ModifierTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Which bit of [`ModifierFlags`] a key code maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierFlagBit {
    Shift,
    Control,
    Option,
    Command,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(code: VirtualKeyCode) -> Option<ModifierFlagBit> {
        if code.0 == 56 {
            Some(ModifierFlagBit::Shift)
        } else {
            None
        }
    }

    #[test]
    fn key_down_then_up_round_trips_to_empty() {
        let mut tracker = ModifierTracker::new();
        let code = VirtualKeyCode(56);
        let down = tracker.key_changed(code, true, shift).unwrap();
        assert!(down.flags.shift);
        let up = tracker.key_changed(code, false, shift).unwrap();
        assert!(up.flags.is_empty());
    }

    #[test]
    fn duplicate_down_does_not_emit_twice() {
        let mut tracker = ModifierTracker::new();
        let code = VirtualKeyCode(56);
        assert!(tracker.key_changed(code, true, shift).is_some());
        assert!(tracker.key_changed(code, true, shift).is_none());
    }

    #[test]
    fn stale_held_key_force_clears() {
        let mut tracker = ModifierTracker::new();
        let code = VirtualKeyCode(56);
        tracker.key_changed(code, true, shift);
        assert!(tracker.tick(Duration::from_millis(400)).is_none());
        let event = tracker.tick(Duration::from_millis(200)).unwrap();
        assert!(event.flags.is_empty());
    }

    #[test]
    fn reconcile_adopts_os_state() {
        let mut tracker = ModifierTracker::new();
        let code = VirtualKeyCode(56);
        tracker.key_changed(code, true, shift);
        let os_flags = ModifierFlags::default();
        let event = tracker.reconcile(os_flags).unwrap();
        assert!(event.flags.is_empty());
        assert!(tracker.held.is_empty());
    }
}
