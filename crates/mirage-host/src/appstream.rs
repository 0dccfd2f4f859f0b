//! App-stream orchestrator (§4.I).
//!
//! Per-session (bundle id) tracking of streamed windows, with a
//! cooldown grace period so a window that closes and reopens quickly
//! doesn't bounce the client back to the app picker.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::info;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub stream_id: u16,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

/// Outcome of a `newWindow` observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewWindowOutcome {
    RedirectedFromCooldown { window_id: u32 },
    NewStream,
}

/// A streamed application session, keyed by bundle id.
pub struct AppSession {
    pub client_id: uuid::Uuid,
    pub bundle_id: String,
    pub app_name: String,
    pub app_path: String,
    pub windows: HashMap<u32, WindowEntry>,
    pub windows_in_cooldown: HashMap<u32, Instant>,
    cooldown: Duration,
    deferred_app_list_request: bool,
}

impl AppSession {
    #[must_use]
    pub fn new(client_id: uuid::Uuid, bundle_id: String, app_name: String, app_path: String) -> Self {
        Self {
            client_id,
            bundle_id,
            app_name,
            app_path,
            windows: HashMap::new(),
            windows_in_cooldown: HashMap::new(),
            cooldown: DEFAULT_COOLDOWN,
            deferred_app_list_request: false,
        }
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn add_window(&mut self, window_id: u32, entry: WindowEntry) {
        self.windows.insert(window_id, entry);
    }

    /// A new window appeared for this already-streamed app. If a
    /// cooldown slot exists, the new window redirects into it
    /// (`windowCooldownCancelled`); otherwise it becomes a fresh
    /// stream (`windowAddedToStream`).
    pub fn handle_new_window(&mut self, window_id: u32, entry: WindowEntry) -> NewWindowOutcome {
        if let Some((&cooldown_window, _)) = self.windows_in_cooldown.iter().next() {
            self.windows_in_cooldown.remove(&cooldown_window);
            self.windows.insert(window_id, entry);
            info!(bundle_id = %self.bundle_id, window_id, "redirected cooldown slot to new window");
            return NewWindowOutcome::RedirectedFromCooldown {
                window_id: cooldown_window,
            };
        }
        self.windows.insert(window_id, entry);
        NewWindowOutcome::NewStream
    }

    /// A streamed window closed: stop its stream (caller's
    /// responsibility) and start a cooldown.
    pub fn handle_window_closed(&mut self, window_id: u32) -> Option<WindowEntry> {
        let entry = self.windows.remove(&window_id)?;
        self.windows_in_cooldown
            .insert(window_id, Instant::now() + self.cooldown);
        Some(entry)
    }

    /// Windows whose cooldown has expired without a replacement
    /// arriving; caller sends `returnToAppSelection` for each.
    pub fn expire_cooldowns(&mut self) -> Vec<u32> {
        let now = Instant::now();
        let expired: Vec<u32> = self
            .windows_in_cooldown
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.windows_in_cooldown.remove(id);
        }
        expired
    }

    /// App terminated: stop everything and report which windows
    /// closed and whether any remain (there shouldn't be any, but the
    /// wire message wants an explicit flag).
    pub fn terminate(&mut self) -> (Vec<u32>, bool) {
        let closed: Vec<u32> = self.windows.keys().copied().collect();
        self.windows.clear();
        self.windows_in_cooldown.clear();
        (closed, false)
    }

    #[must_use]
    pub fn has_windows(&self) -> bool {
        !self.windows.is_empty() || !self.windows_in_cooldown.is_empty()
    }
}

/// Tracks whether an `appListRequest` must be deferred because a
/// desktop stream is currently active (§4.I).
#[derive(Default)]
pub struct AppListGate {
    desktop_stream_active: bool,
    pending: Vec<uuid::Uuid>,
}

impl AppListGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_desktop_stream_active(&mut self, active: bool) -> Vec<uuid::Uuid> {
        self.desktop_stream_active = active;
        if active {
            Vec::new()
        } else {
            std::mem::take(&mut self.pending)
        }
    }

    /// Returns `true` if the request should be answered immediately;
    /// `false` if it was queued and will be delivered once the
    /// desktop stream stops.
    pub fn request(&mut self, client_id: uuid::Uuid) -> bool {
        if self.desktop_stream_active {
            self.pending.push(client_id);
            false
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(stream_id: u16) -> WindowEntry {
        WindowEntry {
            stream_id,
            title: "Untitled".into(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }

    fn session() -> AppSession {
        AppSession::new(
            uuid::Uuid::from_u128(1),
            "com.example.app".into(),
            "Example".into(),
            "/Applications/Example.app".into(),
        )
    }

    #[test]
    fn closed_window_enters_cooldown_then_expires() {
        let mut app = session().with_cooldown(Duration::from_millis(0));
        app.add_window(1, window(10));
        app.handle_window_closed(1);
        assert!(app.windows_in_cooldown.contains_key(&1));
        std::thread::sleep(Duration::from_millis(1));
        let expired = app.expire_cooldowns();
        assert_eq!(expired, vec![1]);
    }

    #[test]
    fn new_window_redirects_into_cooldown_slot() {
        let mut app = session();
        app.add_window(1, window(10));
        app.handle_window_closed(1);
        let outcome = app.handle_new_window(2, window(11));
        assert_eq!(outcome, NewWindowOutcome::RedirectedFromCooldown { window_id: 1 });
        assert!(app.windows_in_cooldown.is_empty());
    }

    #[test]
    fn new_window_without_cooldown_is_fresh_stream() {
        let mut app = session();
        let outcome = app.handle_new_window(1, window(10));
        assert_eq!(outcome, NewWindowOutcome::NewStream);
    }

    #[test]
    fn terminate_clears_all_windows() {
        let mut app = session();
        app.add_window(1, window(10));
        let (closed, has_remaining) = app.terminate();
        assert_eq!(closed, vec![1]);
        assert!(!has_remaining);
        assert!(!app.has_windows());
    }

    #[test]
    fn app_list_request_deferred_while_desktop_stream_active() {
        let mut gate = AppListGate::new();
        gate.set_desktop_stream_active(true);
        let client = uuid::Uuid::from_u128(1);
        assert!(!gate.request(client));
        let released = gate.set_desktop_stream_active(false);
        assert_eq!(released, vec![client]);
    }
}
