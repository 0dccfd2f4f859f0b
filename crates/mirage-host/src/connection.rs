//! Connection layer (§4.B): one TCP control socket per client, the
//! hello handshake, and the fatal-vs-transient error classifier.

use std::io;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::protocol::{ControlMessage, MessageType, PayloadReader, ProtocolError, PROTOCOL_VERSION};

/// Max bytes read while waiting for the initial `hello` (§4.B).
pub const HELLO_MAX_BYTES: usize = 4096;

/// Transient-error grace window before a connection is dropped.
pub const TRANSIENT_GRACE: Duration = Duration::from_secs(5);

/// POSIX errno values the design calls out as immediately fatal:
/// broken pipe (32), connection reset (54/104 depending on platform),
/// and socket-not-connected (57).
const FATAL_ERRNOS: [i32; 4] = [32, 54, 57, 104];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    Transient,
}

/// Classify an I/O error per §4.B / §7 ("Transport fatal" vs
/// "Transport transient").
#[must_use]
pub fn classify_io_error(err: &io::Error) -> ErrorClass {
    match err.raw_os_error() {
        Some(code) if FATAL_ERRNOS.contains(&code) => ErrorClass::Fatal,
        _ => match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected => ErrorClass::Fatal,
            _ => ErrorClass::Transient,
        },
    }
}

/// Tracks how long transient errors have been persisting for one
/// connection; once they exceed [`TRANSIENT_GRACE`] continuously the
/// connection must be dropped.
pub struct GraceWindow {
    first_seen: Option<Instant>,
}

impl GraceWindow {
    #[must_use]
    pub fn new() -> Self {
        Self { first_seen: None }
    }

    /// Record a transient error. Returns `true` if the grace window
    /// has been exceeded and the caller must disconnect.
    pub fn record_transient(&mut self) -> bool {
        let first = *self.first_seen.get_or_insert_with(Instant::now);
        first.elapsed() >= TRANSIENT_GRACE
    }

    /// Record success, clearing any accumulated transient-error time.
    pub fn record_success(&mut self) {
        self.first_seen = None;
    }
}

impl Default for GraceWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct HelloInfo {
    pub device_id: uuid::Uuid,
    pub device_name: String,
    pub device_type: String,
    pub icloud_user_id: Option<String>,
    pub version: u8,
}

const TAG_DEVICE_ID: u8 = 1;
const TAG_DEVICE_NAME: u8 = 2;
const TAG_DEVICE_TYPE: u8 = 3;
const TAG_ICLOUD_USER_ID: u8 = 4;

/// Parse the TLV payload of a `hello` message.
pub fn parse_hello(payload: bytes::Bytes) -> Result<HelloInfo, ProtocolError> {
    let reader = PayloadReader::parse(payload)?;
    let device_id_bytes = reader
        .bytes(TAG_DEVICE_ID)
        .ok_or(ProtocolError::MalformedPayload("missing deviceId"))?;
    let device_id = uuid::Uuid::from_slice(device_id_bytes)
        .map_err(|_| ProtocolError::MalformedPayload("invalid deviceId"))?;
    let device_name = reader
        .str(TAG_DEVICE_NAME)?
        .ok_or(ProtocolError::MalformedPayload("missing deviceName"))?
        .to_string();
    let device_type = reader
        .str(TAG_DEVICE_TYPE)?
        .ok_or(ProtocolError::MalformedPayload("missing deviceType"))?
        .to_string();
    let icloud_user_id = reader.str(TAG_ICLOUD_USER_ID)?.map(str::to_string);

    Ok(HelloInfo {
        device_id,
        device_name,
        device_type,
        icloud_user_id,
        version: PROTOCOL_VERSION,
    })
}

/// Read a single `hello` frame from `stream`, enforcing the 4 KiB cap.
///
/// # Errors
/// Returns an error if more than [`HELLO_MAX_BYTES`] are read without
/// completing a frame, the stream closes early, or the frame is not a
/// `hello`.
pub async fn read_hello(stream: &mut TcpStream) -> anyhow::Result<HelloInfo> {
    let mut buf = BytesMut::with_capacity(256);
    loop {
        if let Some((message, _consumed)) = ControlMessage::decode(&buf)? {
            if message.msg_type != MessageType::Hello {
                anyhow::bail!("expected hello, got {:?}", message.msg_type);
            }
            return Ok(parse_hello(message.payload)?);
        }
        if buf.len() >= HELLO_MAX_BYTES {
            anyhow::bail!("hello exceeded {HELLO_MAX_BYTES} bytes without completing");
        }
        let mut chunk = [0u8; 512];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before hello completed");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Send a `helloResponse`.
pub async fn send_hello_response(
    stream: &mut TcpStream,
    accepted: bool,
    host_id: uuid::Uuid,
    host_name: &str,
    data_port: u16,
) -> anyhow::Result<()> {
    use crate::protocol::PayloadWriter;
    let mut writer = PayloadWriter::new();
    writer.put_bool(1, accepted);
    if accepted {
        writer
            .put_bytes(2, host_id.as_bytes())
            .put_str(3, host_name)
            .put_u16(4, data_port);
    }
    let message = ControlMessage::new(MessageType::HelloResponse, writer.finish());
    stream.write_all(&message.encode()).await?;
    info!(accepted, "sent helloResponse");
    Ok(())
}

/// Refuse the single-client slot and close immediately.
pub async fn refuse_and_close(stream: &mut TcpStream) {
    let message = ControlMessage::new(MessageType::HelloResponse, {
        let mut writer = crate::protocol::PayloadWriter::new();
        writer.put_bool(1, false);
        writer.finish()
    });
    let _ = stream.write_all(&message.encode()).await;
    let _ = stream.shutdown().await;
    warn!("refused hello, single-client slot occupied");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PayloadWriter;

    #[test]
    fn broken_pipe_errno_classifies_fatal() {
        let err = io::Error::from_raw_os_error(32);
        assert_eq!(classify_io_error(&err), ErrorClass::Fatal);
    }

    #[test]
    fn would_block_classifies_transient() {
        let err = io::Error::new(io::ErrorKind::WouldBlock, "would block");
        assert_eq!(classify_io_error(&err), ErrorClass::Transient);
    }

    #[test]
    fn grace_window_trips_after_persisting() {
        let mut window = GraceWindow::new();
        assert!(!window.record_transient());
        // Simulate elapsed time by constructing a window already started.
        window.first_seen = Some(Instant::now() - TRANSIENT_GRACE - Duration::from_secs(1));
        assert!(window.record_transient());
    }

    #[test]
    fn grace_window_resets_on_success() {
        let mut window = GraceWindow::new();
        window.record_transient();
        window.record_success();
        assert!(window.first_seen.is_none());
    }

    #[test]
    fn parse_hello_round_trips() {
        let device_id = uuid::Uuid::from_u128(42);
        let mut writer = PayloadWriter::new();
        writer
            .put_bytes(TAG_DEVICE_ID, device_id.as_bytes())
            .put_str(TAG_DEVICE_NAME, "iPad")
            .put_str(TAG_DEVICE_TYPE, "ipad");
        let info = parse_hello(writer.finish()).unwrap();
        assert_eq!(info.device_id, device_id);
        assert_eq!(info.device_name, "iPad");
        assert!(info.icloud_user_id.is_none());
    }

    #[test]
    fn parse_hello_rejects_missing_device_id() {
        let writer = PayloadWriter::new();
        assert!(parse_hello(writer.finish()).is_err());
    }
}
