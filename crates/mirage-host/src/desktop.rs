//! Desktop stream controller (§4.G).
//!
//! Mutually exclusive with any app/window stream. Snapshots the
//! current physical-display mirroring topology before enabling
//! mirroring onto the virtual display, and restores it verbatim on
//! stop (testable property 6: mirroring restoration).

use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopMode {
    /// Physical displays follow the virtual one; input maps to the
    /// primary physical display's bounds, aspect-fit within it.
    Mirrored,
    /// Virtual display is a distinct logical display; input maps
    /// directly to its bounds; cursor position is forwarded to the
    /// client for remote-cursor rendering.
    Secondary,
}

/// A physical display's mirror target at the moment mirroring is
/// enabled, restored verbatim on stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    pub physical_display_id: u32,
    pub mirrored_onto: Option<u32>,
}

/// Snapshot of the entire mirroring topology, a pure value so
/// "restoration" is literal structural equality against the saved
/// snapshot (§9 design note).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MirroringSnapshot {
    pub entries: Vec<MirrorEntry>,
}

pub struct DesktopStreamController {
    active: bool,
    mode: Option<DesktopMode>,
    snapshot: Option<MirroringSnapshot>,
}

impl DesktopStreamController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: false,
            mode: None,
            snapshot: None,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn mode(&self) -> Option<DesktopMode> {
        self.mode
    }

    /// Start the desktop stream. `current_topology` is the live
    /// mirroring state as observed right now; it becomes the snapshot
    /// restored on stop. Callers are responsible for stopping all
    /// app/window streams first (mutual exclusion).
    pub fn start(&mut self, mode: DesktopMode, current_topology: MirroringSnapshot) {
        info!(?mode, "starting desktop stream, snapshotting topology");
        self.snapshot = Some(current_topology);
        self.mode = Some(mode);
        self.active = true;
    }

    /// Stop the desktop stream and return the snapshot that must be
    /// restored by the caller's display backend.
    pub fn stop(&mut self) -> Option<MirroringSnapshot> {
        self.active = false;
        self.mode = None;
        self.snapshot.take()
    }

    /// Map a normalized client point to physical-display pixel
    /// coordinates, per the mode's mapping rule.
    #[must_use]
    pub fn map_input(
        &self,
        norm_x: f64,
        norm_y: f64,
        virtual_bounds: (u32, u32),
        primary_physical_bounds: (u32, u32),
    ) -> (f64, f64) {
        match self.mode {
            Some(DesktopMode::Secondary) | None => {
                (norm_x * f64::from(virtual_bounds.0), norm_y * f64::from(virtual_bounds.1))
            }
            Some(DesktopMode::Mirrored) => {
                let (vw, vh) = (f64::from(virtual_bounds.0), f64::from(virtual_bounds.1));
                let (pw, ph) = (
                    f64::from(primary_physical_bounds.0),
                    f64::from(primary_physical_bounds.1),
                );
                let scale = (pw / vw).min(ph / vh);
                let offset_x = (pw - vw * scale) / 2.0;
                let offset_y = (ph - vh * scale) / 2.0;
                (
                    offset_x + norm_x * vw * scale,
                    offset_y + norm_y * vh * scale,
                )
            }
        }
    }
}

impl Default for DesktopStreamController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_restores_exact_snapshot_taken_at_start() {
        let mut controller = DesktopStreamController::new();
        let topology = MirroringSnapshot {
            entries: vec![MirrorEntry {
                physical_display_id: 1,
                mirrored_onto: None,
            }],
        };
        controller.start(DesktopMode::Mirrored, topology.clone());
        let restored = controller.stop().unwrap();
        assert_eq!(restored, topology);
    }

    #[test]
    fn stop_without_start_returns_none() {
        let mut controller = DesktopStreamController::new();
        assert!(controller.stop().is_none());
    }

    #[test]
    fn secondary_mode_maps_directly_to_virtual_bounds() {
        let mut controller = DesktopStreamController::new();
        controller.start(DesktopMode::Secondary, MirroringSnapshot::default());
        let (x, y) = controller.map_input(0.5, 0.5, (1000, 800), (1920, 1080));
        assert_eq!((x, y), (500.0, 400.0));
    }
}
