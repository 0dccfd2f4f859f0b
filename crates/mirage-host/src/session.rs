//! Session-state tracker (§4.D).
//!
//! Reports the host's session state and mints a fresh session token on
//! every transition away from `active`, so a stale client-held token
//! can never unlock a new session.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use rand::RngCore;
use tracing::info;

/// Polling cadence for the session-state refresh loop.
pub const REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3);

/// Maximum `unlockRequest` retries before the client must reconnect.
pub const MAX_UNLOCK_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Active,
    Locked,
    LoginScreen,
    Screensaver,
    Sleeping,
}

impl SessionState {
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Active)
    }
}

/// A random, base64-encoded session token minted on every non-active
/// transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Error code surfaced in `unlockResponse` when a token fails to
/// verify (§7 "User-visible surfaces").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockError {
    SessionExpired,
    TooManyRetries,
}

#[derive(Debug, Clone)]
pub struct UnlockOutcome {
    pub success: bool,
    pub new_state: SessionState,
    pub new_session_token: Option<SessionToken>,
    pub can_retry: bool,
    pub retries_remaining: u32,
    pub retry_after_seconds: u32,
    pub error: Option<UnlockError>,
}

/// Tracks session state, the current token, and unlock retry budget.
/// Notifies registered observers on every state transition.
pub struct SessionTracker {
    state: SessionState,
    token: SessionToken,
    retries_used: u32,
    retry_after_seconds: u32,
    max_retries: u32,
}

impl SessionTracker {
    #[must_use]
    pub fn new(initial: SessionState) -> Self {
        Self::with_max_retries(initial, MAX_UNLOCK_RETRIES)
    }

    /// As [`SessionTracker::new`], but with a caller-supplied retry
    /// budget (`HostConfig::session.max_unlock_retries`) instead of the
    /// built-in default.
    #[must_use]
    pub fn with_max_retries(initial: SessionState, max_retries: u32) -> Self {
        Self {
            state: initial,
            token: SessionToken::generate(),
            retries_used: 0,
            retry_after_seconds: 2,
            max_retries,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Apply an observed OS session-state transition. Returns `Some`
    /// with the freshly minted token if the transition left `active`
    /// (§4.D "to non-active: ... mint a new session token").
    pub fn transition(&mut self, new_state: SessionState) -> Option<SessionToken> {
        if new_state == self.state {
            return None;
        }
        let was_active = self.state.is_active();
        self.state = new_state;

        if was_active && !new_state.is_active() {
            self.token = SessionToken::generate();
            self.retries_used = 0;
            info!(?new_state, "session left active, minted new token");
            return Some(self.token.clone());
        }
        if !was_active && new_state.is_active() {
            info!("session returned to active");
        }
        None
    }

    /// Handle an `unlockRequest`. `presented_token` must match the
    /// current token exactly; `requires_username` callers additionally
    /// need the caller to have verified the username out of band
    /// before calling this.
    pub fn handle_unlock(
        &mut self,
        presented_token: &str,
        requires_username: bool,
        username_ok: bool,
    ) -> UnlockOutcome {
        if self.retries_used >= self.max_retries {
            return UnlockOutcome {
                success: false,
                new_state: self.state,
                new_session_token: None,
                can_retry: false,
                retries_remaining: 0,
                retry_after_seconds: self.retry_after_seconds,
                error: Some(UnlockError::TooManyRetries),
            };
        }

        let token_ok = presented_token == self.token.as_str();
        let username_check = !requires_username || username_ok;

        if token_ok && username_check {
            self.retries_used = 0;
            let previous_state = self.state;
            self.state = SessionState::Active;
            return UnlockOutcome {
                success: true,
                new_state: previous_state,
                new_session_token: None,
                can_retry: false,
                retries_remaining: self.max_retries,
                retry_after_seconds: 0,
                error: None,
            };
        }

        self.retries_used += 1;
        let remaining = self.max_retries.saturating_sub(self.retries_used);
        UnlockOutcome {
            success: false,
            new_state: self.state,
            new_session_token: Some(self.token.clone()),
            can_retry: remaining > 0,
            retries_remaining: remaining,
            retry_after_seconds: self.retry_after_seconds,
            error: Some(UnlockError::SessionExpired),
        }
    }
}

#[must_use]
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_to_non_active_mints_new_token() {
        let mut tracker = SessionTracker::new(SessionState::Active);
        let old_token = tracker.token().clone();
        let minted = tracker.transition(SessionState::Locked);
        assert!(minted.is_some());
        assert_ne!(tracker.token(), &old_token);
    }

    #[test]
    fn transition_to_same_state_is_noop() {
        let mut tracker = SessionTracker::new(SessionState::Active);
        assert!(tracker.transition(SessionState::Active).is_none());
    }

    #[test]
    fn unlock_with_stale_token_reports_session_expired() {
        let mut tracker = SessionTracker::new(SessionState::Active);
        tracker.transition(SessionState::Locked);
        let outcome = tracker.handle_unlock("stale-token", false, true);
        assert!(!outcome.success);
        assert_eq!(outcome.error, Some(UnlockError::SessionExpired));
        assert!(outcome.can_retry);
    }

    #[test]
    fn unlock_with_correct_token_succeeds() {
        let mut tracker = SessionTracker::new(SessionState::Locked);
        let token = tracker.token().as_str().to_string();
        let outcome = tracker.handle_unlock(&token, false, true);
        assert!(outcome.success);
        assert_eq!(tracker.state(), SessionState::Active);
    }

    #[test]
    fn retries_exhausted_blocks_further_attempts() {
        let mut tracker = SessionTracker::new(SessionState::Locked);
        for _ in 0..MAX_UNLOCK_RETRIES {
            tracker.handle_unlock("wrong", false, true);
        }
        let outcome = tracker.handle_unlock("wrong", false, true);
        assert_eq!(outcome.error, Some(UnlockError::TooManyRetries));
        assert!(!outcome.can_retry);
    }
}
