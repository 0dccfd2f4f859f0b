use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot, Mutex};

use mirage_host::appstream::WindowEntry;
use mirage_host::config::HostConfig;
use mirage_host::connection::{self, read_hello};
use mirage_host::desktop::{DesktopMode, MirroringSnapshot};
use mirage_host::host::{Host, HelloOutcome};
use mirage_host::persist::{BenchmarkStore, TrustedDevice, TrustedDeviceStore};
use mirage_host::protocol::{ControlMessage, MessageType, PayloadReader, PayloadWriter};
use mirage_host::router::MessageRouter;
use mirage_host::session::{now_unix_secs, SessionState};
use mirage_host::stream::StreamFlags;
use mirage_host::trust::{run_gate, ApprovalDelegate, GateOutcome, PeerIdentity, TrustOutcome, TrustProvider, TrustVerdict};
use mirage_input::{InputController, InputError, InputInjector, ModifierFlags, MouseButton, MouseInputEvent, StreamId, VirtualKeyCode, WindowFrame};

/// Mirage host streaming engine.
///
/// Accepts a single LAN client over the control/data protocol and
/// drives capture, encode, and input-injection behind the trait
/// boundaries in `mirage-capture`, `mirage-encode`, and `mirage-input`.
#[derive(Parser, Debug)]
#[command(name = "mirage-host", version, about)]
struct Cli {
    /// Address to bind the control-plane listener to.
    #[arg(long, default_value = "0.0.0.0")]
    addr: String,

    /// Control-plane TCP port.
    #[arg(long, default_value_t = mirage_host::config::DEFAULT_CONTROL_PORT)]
    port: u16,

    /// Data-plane UDP port.
    #[arg(long, default_value_t = mirage_host::config::DEFAULT_DATA_PORT)]
    data_port: u16,

    /// Path to a TOML configuration file. Missing fields (or a
    /// missing file) fall back to built-in defaults.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HostConfig::load(path).context("loading config")?,
        None => HostConfig::default(),
    };

    let bind_addr: SocketAddr = format!("{}:{}", cli.addr, cli.port)
        .parse()
        .context("invalid bind address")?;
    let data_port = if cli.data_port != mirage_host::config::DEFAULT_DATA_PORT {
        cli.data_port
    } else {
        config.data_port
    };

    let state_dir = config.resolve_state_dir();
    let mut trusted_devices = TrustedDeviceStore::new(&state_dir);
    if let Err(err) = trusted_devices.load() {
        tracing::warn!(%err, "failed to load trusted-device list, starting empty");
    }
    let trusted_devices = Arc::new(Mutex::new(trusted_devices));
    let benchmarks = Arc::new(BenchmarkStore::new(&state_dir));
    let approval_timeout = Duration::from_secs(config.session.approval_timeout_secs);

    let host = Arc::new(Mutex::new(Host::with_config(bind_addr.port(), data_port, &config)));
    host.lock().await.start_advertising();

    let udp = UdpSocket::bind(SocketAddr::from((bind_addr.ip(), data_port)))
        .await
        .context("binding data-plane UDP socket")?;
    tracing::info!(%bind_addr, data_port, "mirage-host listening");
    tokio::spawn(run_data_plane(Arc::clone(&host), udp));

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("binding control-plane TCP listener")?;

    loop {
        let (stream, peer) = listener.accept().await.context("accepting connection")?;
        tracing::info!(%peer, "connection accepted");
        let host = Arc::clone(&host);
        let trusted_devices = Arc::clone(&trusted_devices);
        let benchmarks = Arc::clone(&benchmarks);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(host, stream, trusted_devices, benchmarks, approval_timeout).await {
                tracing::warn!(%peer, %err, "connection ended with error");
            }
        });
    }
}

/// Reads quality-probe and data-frame registration traffic. Video
/// frame bytes themselves are pushed by the (not-yet-wired) capture
/// and encode backends directly onto this same socket once a concrete
/// `CaptureSource`/`Encoder` pair is plugged in.
async fn run_data_plane(host: Arc<Mutex<Host>>, socket: UdpSocket) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(%err, "data-plane recv error");
                continue;
            }
        };
        if n < mirage_host::protocol::DATA_HEADER_LEN {
            continue;
        }
        if buf[..4] == mirage_host::protocol::DATA_MAGIC {
            let stream_id = u16::from_le_bytes([buf[4], buf[5]]);
            host.lock().await.register_stream_udp(stream_id);
            tracing::debug!(%peer, stream_id, "stream registered over UDP");
        }
        // Quality-probe ("MIRQ") packets are echoed back by a
        // dedicated client-driven exchange; the host side only paces
        // the send direction (quality.rs), so inbound probes here are
        // client->host round-trip markers and are ignored for now.
    }
}

/// Injector used until a concrete OS-level backend is plugged in
/// (out of scope for this crate — see `mirage_input::InputInjector`
/// doc comment). Every call just traces; this is what keeps the
/// `mirage-input` dispatch path reachable and exercised end to end
/// without depending on platform HID APIs.
struct LoggingInjector;

impl InputInjector for LoggingInjector {
    fn warp_cursor(&mut self, x: f64, y: f64) -> Result<(), InputError> {
        tracing::trace!(x, y, "warp_cursor");
        Ok(())
    }
    fn mouse_move(&mut self, x: f64, y: f64) -> Result<(), InputError> {
        tracing::trace!(x, y, "mouse_move");
        Ok(())
    }
    fn mouse_button(&mut self, button: MouseButton, pressed: bool) -> Result<(), InputError> {
        tracing::trace!(?button, pressed, "mouse_button");
        Ok(())
    }
    fn scroll(&mut self, dx: i32, dy: i32, alt: bool) -> Result<(), InputError> {
        tracing::trace!(dx, dy, alt, "scroll");
        Ok(())
    }
    fn key_event(&mut self, code: VirtualKeyCode, pressed: bool) -> Result<(), InputError> {
        tracing::trace!(code = code.0, pressed, "key_event");
        Ok(())
    }
    fn flags_changed(&mut self, flags: ModifierFlags) -> Result<(), InputError> {
        tracing::trace!(?flags, "flags_changed");
        Ok(())
    }
    fn query_modifier_state(&mut self) -> Result<ModifierFlags, InputError> {
        Ok(ModifierFlags::default())
    }
}

/// Trust provider backed by the persisted trusted-device list: a
/// device that has completed the gate once skips approval on
/// reconnect.
struct StoreTrustProvider {
    store: Arc<Mutex<TrustedDeviceStore>>,
}

#[async_trait::async_trait]
impl TrustProvider for StoreTrustProvider {
    async fn evaluate(&self, identity: &PeerIdentity) -> TrustOutcome {
        let trusted = self.store.lock().await.is_trusted(identity.device_id);
        if trusted {
            TrustOutcome::Verdict(TrustVerdict::Trusted)
        } else {
            TrustOutcome::Verdict(TrustVerdict::RequiresApproval)
        }
    }
}

/// Approval delegate standing in for the out-of-scope host-side
/// pairing UI (§1 "Deliberately out of scope"): every request is
/// auto-approved and remembered, so the gate's race/timeout machinery
/// is exercised without a human in the loop.
struct AutoApproveDelegate {
    store: Arc<Mutex<TrustedDeviceStore>>,
}

impl ApprovalDelegate for AutoApproveDelegate {
    fn request_approval(&self, identity: &PeerIdentity) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let store = Arc::clone(&self.store);
        let identity = identity.clone();
        tokio::spawn(async move {
            let mut store = store.lock().await;
            store.remember(TrustedDevice {
                device_id: identity.device_id,
                device_name: identity.device_name,
                icloud_user_id: String::new(),
                trusted_at_unix_secs: now_unix_secs(),
            });
            if let Err(err) = store.save() {
                tracing::warn!(%err, "failed to persist trusted-device list");
            }
            let _ = tx.send(true);
        });
        rx
    }
}

/// State shared between the control-message handler and the input
/// dispatch task for one connection.
struct ConnCtx {
    host: Arc<Mutex<Host>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    benchmarks: Arc<BenchmarkStore>,
    input: Arc<Mutex<InputController<LoggingInjector>>>,
}

async fn send_message(writer: &Arc<Mutex<OwnedWriteHalf>>, message: ControlMessage) {
    let encoded = message.encode();
    if let Err(err) = writer.lock().await.write_all(&encoded).await {
        tracing::warn!(%err, "failed to write reply");
    }
}

fn session_state_code(state: SessionState) -> u8 {
    match state {
        SessionState::Active => 0,
        SessionState::Locked => 1,
        SessionState::LoginScreen => 2,
        SessionState::Screensaver => 3,
        SessionState::Sleeping => 4,
    }
}

fn stream_started_payload(stream_id: u16, dimension_token: u32, width: u32, height: u32, frame_rate: u32) -> Bytes {
    let mut writer = PayloadWriter::new();
    writer
        .put_u16(1, stream_id)
        .put_u32(2, dimension_token)
        .put_u32(3, width)
        .put_u32(4, height)
        .put_u32(5, frame_rate);
    writer.finish()
}

async fn handle_connection(
    host: Arc<Mutex<Host>>,
    mut stream: TcpStream,
    trusted_devices: Arc<Mutex<TrustedDeviceStore>>,
    benchmarks: Arc<BenchmarkStore>,
    approval_timeout: Duration,
) -> Result<()> {
    let hello = read_hello(&mut stream).await?;

    let identity = PeerIdentity {
        device_id: hello.device_id,
        device_name: hello.device_name.clone(),
    };
    let trust_provider = StoreTrustProvider { store: Arc::clone(&trusted_devices) };
    let approval_delegate = AutoApproveDelegate { store: Arc::clone(&trusted_devices) };
    let (_closed_tx, closed_rx) = oneshot::channel();
    let gate_outcome = run_gate(&identity, Some(&trust_provider), &approval_delegate, closed_rx, approval_timeout).await;
    if gate_outcome != GateOutcome::Accepted {
        tracing::info!(?gate_outcome, device = %hello.device_name, "trust gate did not accept connection");
        connection::refuse_and_close(&mut stream).await;
        return Ok(());
    }

    let outcome = {
        let mut host = host.lock().await;
        host.handle_hello(hello.device_id, hello.device_name.clone(), hello.device_type.clone())
    };

    let (accepted, data_port) = {
        let host = host.lock().await;
        (outcome == HelloOutcome::Accepted, host.data_port)
    };
    if !accepted {
        connection::refuse_and_close(&mut stream).await;
        return Ok(());
    }
    let host_id = host.lock().await.host_id;
    connection::send_hello_response(&mut stream, true, host_id, "Mirage Host", data_port).await?;

    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let input = Arc::new(Mutex::new(InputController::new(LoggingInjector)));

    let (input_tx, mut input_rx) = mpsc::channel::<ControlMessage>(256);
    let (control_tx, mut control_rx) = mpsc::channel::<ControlMessage>(64);
    let router = MessageRouter::new(input_tx, control_tx);

    let ctx = Arc::new(ConnCtx {
        host: Arc::clone(&host),
        writer: Arc::clone(&writer),
        benchmarks,
        input: Arc::clone(&input),
    });

    let control_ctx = Arc::clone(&ctx);
    let control_task = tokio::spawn(async move {
        while let Some(message) = control_rx.recv().await {
            handle_control_message(&control_ctx, message).await;
        }
    });

    let input_controller = Arc::clone(&input);
    let input_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(8));
        loop {
            tokio::select! {
                message = input_rx.recv() => {
                    match message {
                        Some(message) => dispatch_input_event(&input_controller, message).await,
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = input_controller.lock().await.tick(Duration::from_millis(8)) {
                        tracing::warn!(%err, "input tick failed");
                    }
                }
            }
        }
    });

    let cooldown_host = Arc::clone(&host);
    let cooldown_writer = Arc::clone(&writer);
    let cooldown_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let expired = cooldown_host.lock().await.expire_window_cooldowns();
            for (_bundle_id, window_id) in expired {
                let mut writer = PayloadWriter::new();
                writer.put_u32(1, window_id);
                send_message(&cooldown_writer, ControlMessage::new(MessageType::ReturnToAppSelection, writer.finish())).await;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 2048];
    let mut read_half = read_half;
    let result = loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => break Ok(()),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Err(err) = router.feed(&mut buf).await {
                    tracing::warn!(%err, "protocol violation, continuing");
                }
            }
            Err(err) => break Err(err),
        }
    };

    drop(router);
    cooldown_task.abort();
    let _ = control_task.await;
    let _ = input_task.await;
    host.lock().await.handle_disconnect();

    Ok(result?)
}

/// Decode one `inputEvent` TLV payload and dispatch it against the
/// connection's `InputController`. Tag layout (caller-defined, scoped
/// to this message type per `protocol::PayloadWriter`'s doc comment):
/// 1=kind(u8) 2=streamId(u16) 3=normX(f32) 4=normY(f32) 5=button(u8)
/// 6=pressed(bool) 7=dx(f32) 8=dy(f32) 9=keyCode(u16) 10=phase(u8)
async fn dispatch_input_event(controller: &Arc<Mutex<InputController<LoggingInjector>>>, message: ControlMessage) {
    let reader = match PayloadReader::parse(message.payload) {
        Ok(reader) => reader,
        Err(err) => {
            tracing::warn!(%err, "malformed inputEvent payload");
            return;
        }
    };
    let Some(kind) = reader.u8(1) else { return };
    let Some(stream_id) = reader.u16(2).map(StreamId) else { return };

    let mut controller = controller.lock().await;
    match kind {
        0 => {
            let (Some(norm_x), Some(norm_y)) = (reader.f32(3), reader.f32(4)) else { return };
            let _ = controller.handle_mouse(stream_id, MouseInputEvent::Move { norm_x: f64::from(norm_x), norm_y: f64::from(norm_y) });
        }
        1 => {
            let (Some(norm_x), Some(norm_y), Some(button), Some(pressed)) =
                (reader.f32(3), reader.f32(4), reader.u8(5), reader.bool(6))
            else {
                return;
            };
            let button = match button {
                0 => MouseButton::Left,
                1 => MouseButton::Right,
                _ => MouseButton::Middle,
            };
            let _ = controller.handle_mouse(
                stream_id,
                MouseInputEvent::Button { button, pressed, norm_x: f64::from(norm_x), norm_y: f64::from(norm_y) },
            );
        }
        2 => {
            let (Some(dx), Some(dy)) = (reader.f32(7), reader.f32(8)) else { return };
            let phase = match reader.u8(10) {
                Some(1) => mirage_input::ScrollPhase::Changed,
                Some(2) => mirage_input::ScrollPhase::Ended,
                _ => mirage_input::ScrollPhase::Began,
            };
            let _ = controller.handle_mouse(
                stream_id,
                MouseInputEvent::Scroll { dx: f64::from(dx), dy: f64::from(dy), dt: Duration::from_millis(16), phase },
            );
        }
        3 => {
            let (Some(key_code), Some(pressed)) = (reader.u16(9), reader.bool(6)) else { return };
            let _ = controller.handle_key(stream_id, VirtualKeyCode(key_code), pressed, |_| None);
        }
        other => tracing::trace!(kind = other, "unrecognized inputEvent kind"),
    }
}

/// Cold-path control message handling: everything except `inputEvent`
/// (§4.K). Backend-dependent message types (window enumeration, menu
/// actions, live cursor/content-bounds reporting) are out of scope for
/// this engine and only traced.
async fn handle_control_message(ctx: &Arc<ConnCtx>, message: ControlMessage) {
    let Ok(reader) = PayloadReader::parse(message.payload.clone()) else {
        tracing::warn!(?message.msg_type, "malformed control payload");
        return;
    };

    match message.msg_type {
        MessageType::StartStream => {
            let Some(window_id) = reader.u32(1) else { return };
            let width = reader.u32(2).unwrap_or(1920);
            let height = reader.u32(3).unwrap_or(1080);
            let mut host = ctx.host.lock().await;
            let fps = reader.u32(4).unwrap_or(host.capture_fps_cap).min(host.capture_fps_cap);
            let encoder_config = mirage_encode::EncoderConfig {
                width,
                height,
                fps,
                ..host.default_encoder_config
            };
            match host.start_stream(window_id, StreamFlags::default(), encoder_config) {
                Ok(stream_id) => {
                    drop(host);
                    ctx.input.lock().await.register_stream(
                        StreamId(stream_id),
                        WindowFrame { x: 0.0, y: 0.0, width: f64::from(width), height: f64::from(height) },
                    );
                    send_message(
                        &ctx.writer,
                        ControlMessage::new(MessageType::StreamStarted, stream_started_payload(stream_id, 0, width, height, fps)),
                    )
                    .await;
                }
                Err(state) => {
                    drop(host);
                    let mut writer = PayloadWriter::new();
                    writer.put_u8(1, session_state_code(state));
                    send_message(&ctx.writer, ControlMessage::new(MessageType::SessionStateUpdate, writer.finish())).await;
                }
            }
        }
        MessageType::StopStream => {
            if let Some(stream_id) = reader.u16(1) {
                ctx.host.lock().await.stop_stream(stream_id);
                let mut input = ctx.input.lock().await;
                let _ = input.clear_modifiers(StreamId(stream_id));
                input.unregister_stream(StreamId(stream_id));
            }
        }
        MessageType::KeyframeRequest => {
            if let Some(stream_id) = reader.u16(1) {
                if let Some(stream) = ctx.host.lock().await.stream_mut(stream_id) {
                    stream.request_keyframe();
                }
            }
        }
        MessageType::DisplayResolutionChange => {
            let (Some(stream_id), Some(width), Some(height)) = (reader.u16(1), reader.u32(2), reader.u32(3)) else { return };
            let announcement = ctx.host.lock().await.stream_mut(stream_id).and_then(|s| s.update_resolution(width, height));
            if let Some(a) = announcement {
                send_message(
                    &ctx.writer,
                    ControlMessage::new(MessageType::StreamStarted, stream_started_payload(a.stream_id, a.dimension_token, a.width, a.height, a.frame_rate)),
                )
                .await;
            }
        }
        MessageType::StreamScaleChange => {
            let (Some(stream_id), Some(scale)) = (reader.u16(1), reader.f32(2)) else { return };
            if let Some(stream) = ctx.host.lock().await.stream_mut(stream_id) {
                stream.update_stream_scale(scale);
            }
        }
        MessageType::StreamRefreshRateChange => {
            let (Some(stream_id), Some(fps)) = (reader.u16(1), reader.u32(2)) else { return };
            if let Some(stream) = ctx.host.lock().await.stream_mut(stream_id) {
                stream.update_frame_rate(fps);
            }
        }
        MessageType::StreamPaused => {
            if let Some(stream_id) = reader.u16(1) {
                if let Some(stream) = ctx.host.lock().await.stream_mut(stream_id) {
                    let _ = stream.pause();
                }
            }
        }
        MessageType::StreamResumed => {
            if let Some(stream_id) = reader.u16(1) {
                if let Some(stream) = ctx.host.lock().await.stream_mut(stream_id) {
                    let _ = stream.resume();
                }
            }
        }
        MessageType::UnlockRequest => {
            let Some(token) = reader.str(1).ok().flatten() else { return };
            let requires_username = reader.bool(2).unwrap_or(false);
            let username_ok = reader.bool(3).unwrap_or(false);
            let outcome = ctx.host.lock().await.session.handle_unlock(token, requires_username, username_ok);
            let mut writer = PayloadWriter::new();
            writer
                .put_bool(1, outcome.success)
                .put_u8(2, session_state_code(outcome.new_state))
                .put_bool(3, outcome.can_retry)
                .put_u32(4, outcome.retries_remaining)
                .put_u32(5, outcome.retry_after_seconds);
            if let Some(token) = outcome.new_session_token {
                writer.put_str(7, token.as_str());
            }
            send_message(&ctx.writer, ControlMessage::new(MessageType::UnlockResponse, writer.finish())).await;
        }
        MessageType::AppListRequest => {
            let mut host = ctx.host.lock().await;
            let Some(client_id) = host.current_client().map(|c| c.client_id) else { return };
            let answer_now = host.request_app_list(client_id);
            drop(host);
            if answer_now {
                send_message(&ctx.writer, ControlMessage::new(MessageType::AppList, Bytes::new())).await;
            }
        }
        MessageType::SelectApp => {
            let (Some(bundle_id), Some(app_name), Some(app_path), Some(window_id)) =
                (reader.str(1).ok().flatten(), reader.str(2).ok().flatten(), reader.str(3).ok().flatten(), reader.u32(4))
            else {
                return;
            };
            let title = reader.str(5).ok().flatten().unwrap_or("Untitled").to_string();
            let width = reader.u32(6).unwrap_or(800);
            let height = reader.u32(7).unwrap_or(600);
            let resizable = reader.bool(8).unwrap_or(true);

            let mut host = ctx.host.lock().await;
            let Some(client_id) = host.current_client().map(|c| c.client_id) else { return };
            let window = WindowEntry { stream_id: 0, title, width, height, resizable };
            match host.select_app(client_id, bundle_id.to_string(), app_name.to_string(), app_path.to_string(), window_id, window, StreamFlags::default()) {
                Ok((stream_id, outcome)) => {
                    let dims = host.stream(stream_id).map(|s| (s.encoder_config().width, s.encoder_config().height, s.encoder_config().fps));
                    drop(host);
                    if let Some((width, height, fps)) = dims {
                        ctx.input.lock().await.register_stream(StreamId(stream_id), WindowFrame { x: 0.0, y: 0.0, width: f64::from(width), height: f64::from(height) });
                        send_message(
                            &ctx.writer,
                            ControlMessage::new(MessageType::AppStreamStarted, stream_started_payload(stream_id, 0, width, height, fps)),
                        )
                        .await;
                    }
                    if let mirage_host::appstream::NewWindowOutcome::RedirectedFromCooldown { window_id } = outcome {
                        let mut writer = PayloadWriter::new();
                        writer.put_u32(1, window_id);
                        send_message(&ctx.writer, ControlMessage::new(MessageType::WindowCooldownCancelled, writer.finish())).await;
                    }
                }
                Err(state) => {
                    drop(host);
                    let mut writer = PayloadWriter::new();
                    writer.put_u8(1, session_state_code(state));
                    send_message(&ctx.writer, ControlMessage::new(MessageType::SessionStateUpdate, writer.finish())).await;
                }
            }
        }
        MessageType::CloseWindowRequest => {
            let (Some(bundle_id), Some(window_id)) = (reader.str(1).ok().flatten(), reader.u32(2)) else { return };
            let closed = ctx.host.lock().await.close_window(bundle_id, window_id);
            if let Some(entry) = closed {
                ctx.input.lock().await.unregister_stream(StreamId(entry.stream_id));
                let mut writer = PayloadWriter::new();
                writer.put_u32(1, window_id);
                send_message(&ctx.writer, ControlMessage::new(MessageType::WindowCooldownStarted, writer.finish())).await;
            }
        }
        MessageType::StartDesktopStream => {
            let mode = match reader.u8(1) {
                Some(1) => DesktopMode::Secondary,
                _ => DesktopMode::Mirrored,
            };
            ctx.host.lock().await.start_desktop_stream(mode, MirroringSnapshot::default());
            send_message(&ctx.writer, ControlMessage::new(MessageType::DesktopStreamStarted, Bytes::new())).await;
        }
        MessageType::StopDesktopStream => {
            let (_, released) = ctx.host.lock().await.stop_desktop_stream();
            send_message(&ctx.writer, ControlMessage::new(MessageType::DesktopStreamStopped, Bytes::new())).await;
            if !released.is_empty() {
                send_message(&ctx.writer, ControlMessage::new(MessageType::AppList, Bytes::new())).await;
            }
        }
        MessageType::QualityTestRequest => match ctx.benchmarks.load() {
            Ok(Some(record)) => {
                let mut writer = PayloadWriter::new();
                writer
                    .put_u32(1, record.version)
                    .put_u32(2, record.width)
                    .put_u32(3, record.height)
                    .put_u32(4, record.fps)
                    .put_f32(5, record.encode_ms as f32)
                    .put_f32(6, record.decode_ms as f32)
                    .put_u64(7, record.measured_at_unix_secs);
                send_message(&ctx.writer, ControlMessage::new(MessageType::QualityTestResult, writer.finish())).await;
            }
            Ok(None) => tracing::trace!("quality test requested, no benchmark on record and no live encode backend to run one"),
            Err(err) => tracing::warn!(%err, "failed to load benchmark record"),
        },
        MessageType::Ping => {
            send_message(&ctx.writer, ControlMessage::new(MessageType::Pong, Bytes::new())).await;
        }
        MessageType::Disconnect => {
            ctx.host.lock().await.handle_disconnect();
        }
        other => {
            tracing::trace!(?other, "control message not wired to a handler (needs an out-of-scope backend)");
        }
    }
}
