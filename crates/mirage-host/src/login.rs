//! Login-display stream controller (§4.H).
//!
//! Starts a stream of the lock/login screen when the session goes
//! non-active and clients are connected. Borrows an existing desktop
//! stream's capture rather than opening a second one (Open Question 2
//! in spec.md §9, resolved below). A watchdog restarts a stalled
//! capture; start failures retry with backoff.

use std::time::{Duration, Instant};

use tracing::{info, warn};

/// **Open Question resolution** (spec.md §9, Q2): when both a desktop
/// stream and a login-display request are active, the login-display
/// controller borrows the desktop stream's capture if one already
/// exists — it never opens a second capture of the same source. If no
/// desktop stream exists, it acquires its own shared-display reference
/// tagged `Consumer::LoginDisplay` and registers a generation-change
/// callback, so a desktop stream that starts *later* observes the
/// already-bound generation instead of racing a fresh acquire. The
/// desktop-stream controller never borrows from the login display —
/// borrowing is one-directional (login borrows from desktop, not the
/// reverse), since the desktop stream's topology snapshot/restore
/// lifecycle must stay independent of login-display churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    Own,
    BorrowedFromDesktop,
}

pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);
pub const STALE_FRAME_THRESHOLD: Duration = Duration::from_secs(6);
pub const STARTUP_GRACE: Duration = Duration::from_secs(4);
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(8);
pub const MAX_START_RETRIES: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginDisplayState {
    Stopped,
    Starting,
    Running,
}

pub struct LoginDisplayController {
    state: LoginDisplayState,
    capture_source: Option<CaptureSource>,
    started_at: Option<Instant>,
    last_stopped_at: Option<Instant>,
    retries_used: u32,
}

impl LoginDisplayController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: LoginDisplayState::Stopped,
            capture_source: None,
            started_at: None,
            last_stopped_at: None,
            retries_used: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> LoginDisplayState {
        self.state
    }

    /// Start the login-display stream. `desktop_stream_active`
    /// determines whether capture is borrowed or freshly acquired,
    /// per the Open Question resolution above.
    pub fn start(&mut self, desktop_stream_active: bool) -> Result<(), &'static str> {
        if let Some(last_stop) = self.last_stopped_at {
            if last_stop.elapsed() < RESTART_COOLDOWN {
                return Err("restart cooldown active");
            }
        }
        self.capture_source = Some(if desktop_stream_active {
            CaptureSource::BorrowedFromDesktop
        } else {
            CaptureSource::Own
        });
        self.state = LoginDisplayState::Starting;
        self.started_at = Some(Instant::now());
        info!(source = ?self.capture_source, "starting login-display stream");
        Ok(())
    }

    pub fn mark_running(&mut self) {
        self.state = LoginDisplayState::Running;
        self.retries_used = 0;
    }

    pub fn stop(&mut self) {
        self.state = LoginDisplayState::Stopped;
        self.capture_source = None;
        self.last_stopped_at = Some(Instant::now());
    }

    /// Watchdog check: given the age of the last captured frame,
    /// decide whether a restart is warranted. Returns `true` if the
    /// caller should tear down and restart the stream.
    #[must_use]
    pub fn watchdog_should_restart(&self, last_frame_age: Option<Duration>) -> bool {
        if self.state != LoginDisplayState::Running {
            return false;
        }
        let Some(started_at) = self.started_at else {
            return false;
        };
        if started_at.elapsed() < STARTUP_GRACE {
            return false;
        }
        match last_frame_age {
            Some(age) => age >= STALE_FRAME_THRESHOLD,
            None => started_at.elapsed() >= STALE_FRAME_THRESHOLD,
        }
    }

    /// Record a start failure. Returns `Some(delay)` if another retry
    /// should be scheduled, `None` once retries are exhausted.
    pub fn note_start_failure(&mut self) -> Option<Duration> {
        self.retries_used += 1;
        if self.retries_used > MAX_START_RETRIES {
            warn!("login-display start retries exhausted");
            self.state = LoginDisplayState::Stopped;
            None
        } else {
            Some(RETRY_DELAY)
        }
    }

    /// Cancel any pending retry, e.g. because the session returned to
    /// active (§5 "Cancellation").
    pub fn cancel_retries(&mut self) {
        self.retries_used = 0;
        if self.state == LoginDisplayState::Starting {
            self.state = LoginDisplayState::Stopped;
        }
    }
}

impl Default for LoginDisplayController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_borrows_desktop_capture_when_active() {
        let mut login = LoginDisplayController::new();
        login.start(true).unwrap();
        assert_eq!(login.capture_source, Some(CaptureSource::BorrowedFromDesktop));
    }

    #[test]
    fn start_acquires_own_capture_without_desktop_stream() {
        let mut login = LoginDisplayController::new();
        login.start(false).unwrap();
        assert_eq!(login.capture_source, Some(CaptureSource::Own));
    }

    #[test]
    fn restart_cooldown_blocks_immediate_restart() {
        let mut login = LoginDisplayController::new();
        login.start(false).unwrap();
        login.stop();
        assert!(login.start(false).is_err());
    }

    #[test]
    fn watchdog_waits_out_startup_grace() {
        let mut login = LoginDisplayController::new();
        login.start(false).unwrap();
        login.mark_running();
        assert!(!login.watchdog_should_restart(Some(Duration::from_secs(10))));
    }

    #[test]
    fn retries_stop_after_max_attempts() {
        let mut login = LoginDisplayController::new();
        for _ in 0..MAX_START_RETRIES {
            assert!(login.note_start_failure().is_some());
        }
        assert!(login.note_start_failure().is_none());
    }
}
