//! The `Host` (§3): process-wide singleton holding the client table,
//! stream table, session state, and shared display. All lifecycle
//! transitions happen here; sub-controllers hold no owning references
//! back to it (§9 design note — explicit handles into a central
//! table, not weak back-references).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use mirage_encode::EncoderConfig;
use tracing::{info, warn};

use crate::appstream::{AppListGate, AppSession, NewWindowOutcome, WindowEntry};
use crate::config::HostConfig;
use crate::desktop::{DesktopMode, DesktopStreamController, MirroringSnapshot};
use crate::display::SharedDisplayManager;
use crate::login::LoginDisplayController;
use crate::session::{SessionState, SessionTracker};
use crate::stream::{StreamContext, StreamError, StreamFlags, StreamState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostLifecycle {
    Idle,
    Starting,
    Advertising,
    Stopping,
}

/// Created on a successful hello, destroyed on disconnect or fatal
/// error. Invariant: at most one alive at a time (single-client
/// slot).
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub client_id: uuid::Uuid,
    pub device_name: String,
    pub device_type: String,
    pub connected_at: Instant,
    pub error_first_seen: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloOutcome {
    Accepted,
    RejectedSlotTaken,
}

/// Process-wide singleton. Exactly one exists per process.
pub struct Host {
    pub host_id: uuid::Uuid,
    pub control_port: u16,
    pub data_port: u16,
    lifecycle: HostLifecycle,
    client: Option<ClientContext>,
    streams: HashMap<u16, StreamContext>,
    next_stream_id: u16,
    pub desktop: DesktopStreamController,
    pub login: LoginDisplayController,
    pub session: SessionTracker,
    pub shared_display: SharedDisplayManager,
    pub app_list_gate: AppListGate,
    app_sessions: HashMap<String, AppSession>,
    /// Base encoder config for newly started app/window streams, built
    /// from `HostConfig::encode` (§4.F bitrate bounds/keyframe interval).
    pub default_encoder_config: EncoderConfig,
    /// Host-side frame-rate ceiling from `HostConfig::capture.target_fps`
    /// (§4.F "frameRate = min(maxRefreshRate, hostCap)").
    pub capture_fps_cap: u32,
    /// Threshold a live capture backend compares its producer queue
    /// depth against when feeding `StreamContext::note_frame_budget`
    /// (`HostConfig::capture.queue_depth`).
    pub capture_queue_depth_threshold: u32,
    default_window_cooldown: Duration,
}

impl Host {
    /// Construct with built-in defaults (ports only). Equivalent to
    /// [`Host::with_config`] with a default [`HostConfig`].
    #[must_use]
    pub fn new(control_port: u16, data_port: u16) -> Self {
        Self::with_config(control_port, data_port, &HostConfig::default())
    }

    /// Construct, threading `config`'s capture/encode/session/app-stream
    /// sub-configs into the relevant sub-controllers (§6 "Configuration").
    #[must_use]
    pub fn with_config(control_port: u16, data_port: u16, config: &HostConfig) -> Self {
        let default_encoder_config = EncoderConfig {
            min_bitrate_bps: config.encode.min_bitrate_bps,
            max_bitrate_bps: config.encode.max_bitrate_bps,
            keyframe_interval: config.encode.keyframe_interval,
            fps: config.capture.target_fps,
            ..EncoderConfig::default()
        }
        .clamped();
        Self {
            host_id: uuid::Uuid::new_v4(),
            control_port,
            data_port,
            lifecycle: HostLifecycle::Idle,
            client: None,
            streams: HashMap::new(),
            next_stream_id: 1,
            desktop: DesktopStreamController::new(),
            login: LoginDisplayController::new(),
            session: SessionTracker::with_max_retries(SessionState::Active, config.session.max_unlock_retries),
            shared_display: SharedDisplayManager::new(),
            app_list_gate: AppListGate::new(),
            app_sessions: HashMap::new(),
            default_encoder_config,
            capture_fps_cap: config.capture.target_fps,
            capture_queue_depth_threshold: config.capture.queue_depth,
            default_window_cooldown: Duration::from_secs(config.app_stream.window_cooldown_secs),
        }
    }

    #[must_use]
    pub fn lifecycle(&self) -> HostLifecycle {
        self.lifecycle
    }

    pub fn start_advertising(&mut self) {
        self.lifecycle = HostLifecycle::Starting;
        info!(host_id = %self.host_id, control_port = self.control_port, data_port = self.data_port, "advertising");
        self.lifecycle = HostLifecycle::Advertising;
    }

    pub fn stop(&mut self) {
        self.lifecycle = HostLifecycle::Stopping;
        for stream in self.streams.values_mut() {
            stream.stop();
        }
        self.client = None;
    }

    /// Handle a `hello`. Enforces the single-client slot (testable
    /// property 1): a second concurrent hello while one client is
    /// alive is rejected.
    pub fn handle_hello(
        &mut self,
        client_id: uuid::Uuid,
        device_name: String,
        device_type: String,
    ) -> HelloOutcome {
        if self.client.is_some() {
            warn!(%client_id, "hello rejected: single-client slot occupied");
            return HelloOutcome::RejectedSlotTaken;
        }
        self.client = Some(ClientContext {
            client_id,
            device_name,
            device_type,
            connected_at: Instant::now(),
            error_first_seen: None,
        });
        info!(%client_id, "hello accepted");
        HelloOutcome::Accepted
    }

    #[must_use]
    pub fn current_client(&self) -> Option<&ClientContext> {
        self.client.as_ref()
    }

    /// Disconnect the current client: cancels all owned streams and
    /// releases all shared-display consumers (§5 "Cancellation").
    pub fn handle_disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            info!(client_id = %client.client_id, "client disconnected");
        }
        for stream in self.streams.values_mut() {
            stream.stop();
        }
        self.streams.clear();
    }

    /// Allocate a new stream id and create its context. Returns
    /// `Err` if the session is locked (§7 "State errors": startStream
    /// while locked returns session state instead).
    ///
    /// At most one stream may be live per `windowId` (§3 invariant):
    /// a prior stream for the same window is cancelled first, since
    /// starting a new one supersedes it rather than running alongside
    /// it.
    pub fn start_stream(
        &mut self,
        window_id: u32,
        flags: StreamFlags,
        encoder_config: EncoderConfig,
    ) -> Result<u16, SessionState> {
        if !self.session.state().is_active() {
            return Err(self.session.state());
        }
        if let Some(previous) = self.streams.values_mut().find(|s| s.window_id == window_id) {
            previous.stop();
        }
        let stream_id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(1).max(1);
        let mut stream = StreamContext::new(stream_id, window_id, flags, encoder_config);
        let _ = stream.start();
        self.streams.insert(stream_id, stream);
        Ok(stream_id)
    }

    #[must_use]
    pub fn stream(&self, stream_id: u16) -> Option<&StreamContext> {
        self.streams.get(&stream_id)
    }

    #[must_use]
    pub fn stream_mut(&mut self, stream_id: u16) -> Option<&mut StreamContext> {
        self.streams.get_mut(&stream_id)
    }

    /// Idempotent: stopping an already-stopped or unknown stream id
    /// is a no-op.
    pub fn stop_stream(&mut self, stream_id: u16) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.stop();
        }
    }

    /// `selectApp`/`newWindow` (§4.I): create or reuse the app session
    /// for `bundle_id`, record the window, and start (or redirect into
    /// a cooldown slot's) stream.
    pub fn select_app(
        &mut self,
        client_id: uuid::Uuid,
        bundle_id: String,
        app_name: String,
        app_path: String,
        window_id: u32,
        window: WindowEntry,
        flags: StreamFlags,
    ) -> Result<(u16, NewWindowOutcome), SessionState> {
        let cooldown = self.default_window_cooldown;
        let session = self.app_sessions.entry(bundle_id.clone()).or_insert_with(|| {
            AppSession::new(client_id, bundle_id, app_name, app_path).with_cooldown(cooldown)
        });
        let outcome = session.handle_new_window(window_id, window);
        let stream_id = self.start_stream(window_id, flags, self.default_encoder_config)?;
        Ok((stream_id, outcome))
    }

    /// `closeWindowRequest`/observed window close (§4.I): stop the
    /// window's stream and start its cooldown slot. Returns the closed
    /// window's entry, if the bundle/window were known.
    pub fn close_window(&mut self, bundle_id: &str, window_id: u32) -> Option<WindowEntry> {
        let entry = self.app_sessions.get_mut(bundle_id)?.handle_window_closed(window_id)?;
        self.stop_stream(entry.stream_id);
        Some(entry)
    }

    /// App quit/terminated (§4.I): stop every remaining stream for the
    /// bundle and drop its session. Returns the window ids that were
    /// streaming.
    pub fn terminate_app(&mut self, bundle_id: &str) -> Option<Vec<u32>> {
        let mut session = self.app_sessions.remove(bundle_id)?;
        let stream_ids: Vec<u16> = session.windows.values().map(|w| w.stream_id).collect();
        let (closed, _has_remaining) = session.terminate();
        for stream_id in stream_ids {
            self.stop_stream(stream_id);
        }
        Some(closed)
    }

    /// Sweep cooldowns across every app session, returning
    /// `(bundle_id, window_id)` pairs whose cooldown expired without a
    /// replacement window arriving.
    pub fn expire_window_cooldowns(&mut self) -> Vec<(String, u32)> {
        self.app_sessions
            .iter_mut()
            .flat_map(|(bundle_id, session)| {
                session
                    .expire_cooldowns()
                    .into_iter()
                    .map(|window_id| (bundle_id.clone(), window_id))
            })
            .collect()
    }

    /// `appListRequest` (§4.I): answered immediately unless a desktop
    /// stream is active, in which case it is queued and released by
    /// [`Host::stop_desktop_stream`].
    pub fn request_app_list(&mut self, client_id: uuid::Uuid) -> bool {
        self.app_list_gate.request(client_id)
    }

    /// `startDesktopStream` (§4.G): mutually exclusive with app/window
    /// streams, so every live non-desktop stream is stopped first.
    /// Returns the stopped stream ids for the caller's `streamStopped`
    /// notifications.
    pub fn start_desktop_stream(&mut self, mode: DesktopMode, topology: MirroringSnapshot) -> Vec<u16> {
        let stopped: Vec<u16> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.flags.desktop_stream && s.state() != StreamState::Stopped)
            .map(|(id, _)| *id)
            .collect();
        for id in &stopped {
            self.stop_stream(*id);
        }
        self.desktop.start(mode, topology);
        self.app_list_gate.set_desktop_stream_active(true);
        stopped
    }

    /// `stopDesktopStream`: returns the mirroring snapshot to restore
    /// and the client ids whose deferred `appListRequest` can now be
    /// answered.
    pub fn stop_desktop_stream(&mut self) -> (Option<MirroringSnapshot>, Vec<uuid::Uuid>) {
        let snapshot = self.desktop.stop();
        let released = self.app_list_gate.set_desktop_stream_active(false);
        (snapshot, released)
    }

    pub fn register_stream_udp(&mut self, stream_id: u16) {
        if let Some(stream) = self.streams.get_mut(&stream_id) {
            stream.register();
        } else {
            warn!(stream_id, "UDP registration for unknown stream id");
        }
    }

    pub fn record_result(&mut self, error: StreamError) {
        warn!(%error, "stream error");
    }

    /// Apply a session-state transition (§4.D) and drive the
    /// login-display controller accordingly, borrowing the desktop
    /// stream's capture when one is active rather than racing to
    /// create a second one (§4.H Open Question resolution). Returns
    /// which effect was applied, for the caller's logging/telemetry.
    pub fn apply_session_transition(&mut self, new_state: SessionState) -> SessionTransitionEffect {
        let had_client = self.client.is_some();
        let minted_token = self.session.transition(new_state);
        if minted_token.is_some() {
            if had_client {
                let _ = self.login.start(self.desktop.is_active());
                return SessionTransitionEffect::StartLoginDisplay;
            }
            return SessionTransitionEffect::None;
        }
        if new_state.is_active() {
            self.login.stop();
            return SessionTransitionEffect::StopLoginDisplay;
        }
        SessionTransitionEffect::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransitionEffect {
    None,
    StartLoginDisplay,
    StopLoginDisplay,
}
