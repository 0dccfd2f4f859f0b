//! Wire codec (§4.A): framed TCP control messages and UDP data-packet
//! framing.
//!
//! Control frames are `u32` length (big-endian) | `u8` type | `u8`
//! version | payload. The payload schema itself is not fixed by the
//! original design (an explicitly open question) — this codec picks a
//! self-describing tag-length-value encoding and versions it in the
//! header byte, per the design note to "pick a stable encoding and
//! version it".

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Current wire protocol version, carried in every control message
/// header and every `helloResponse`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum control frame payload size (4 KiB, per the hello size cap
/// in §4.B; applied uniformly since no message needs to be larger).
pub const MAX_FRAME_LEN: u32 = 4096;

const FRAME_HEADER_LEN: usize = 4 + 1 + 1;

/// UDP data-frame header: magic `"MIRG"` then `u16` stream id (LE),
/// padded to 12 bytes total.
pub const DATA_MAGIC: [u8; 4] = *b"MIRG";
pub const DATA_HEADER_LEN: usize = 12;

/// Quality-probe packet magic, distinct from data-frame magic so a
/// stray probe packet is never mistaken for a video frame.
pub const QUALITY_MAGIC: [u8; 4] = *b"MIRQ";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame exceeds maximum length ({0} > {MAX_FRAME_LEN})")]
    FrameTooLarge(u32),
    #[error("unknown message type byte {0}")]
    UnknownType(u8),
    #[error("unsupported protocol version {0} (expected {PROTOCOL_VERSION})")]
    UnsupportedVersion(u8),
    #[error("malformed payload: {0}")]
    MalformedPayload(&'static str),
    #[error("buffer too short for a UDP data header")]
    ShortDatagram,
    #[error("bad UDP magic bytes")]
    BadMagic,
}

/// Every control message type (§3 `ControlMessage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hello = 0,
    HelloResponse = 1,
    StartStream = 2,
    StopStream = 3,
    StreamStarted = 4,
    KeyframeRequest = 5,
    InputEvent = 6,
    DisplayResolutionChange = 7,
    StreamScaleChange = 8,
    StreamRefreshRateChange = 9,
    SessionStateUpdate = 10,
    UnlockRequest = 11,
    UnlockResponse = 12,
    AppListRequest = 13,
    AppList = 14,
    SelectApp = 15,
    AppStreamStarted = 16,
    WindowAddedToStream = 17,
    WindowCooldownStarted = 18,
    WindowCooldownCancelled = 19,
    ReturnToAppSelection = 20,
    AppTerminated = 21,
    CloseWindowRequest = 22,
    StreamPaused = 23,
    StreamResumed = 24,
    CursorUpdate = 25,
    CursorPositionUpdate = 26,
    MenuBarUpdate = 27,
    MenuActionRequest = 28,
    MenuActionResult = 29,
    StartDesktopStream = 30,
    StopDesktopStream = 31,
    DesktopStreamStarted = 32,
    DesktopStreamStopped = 33,
    LoginDisplayReady = 34,
    LoginDisplayStopped = 35,
    ContentBoundsUpdate = 36,
    StreamMetricsUpdate = 37,
    QualityTestRequest = 38,
    QualityTestResult = 39,
    Ping = 40,
    Pong = 41,
    Disconnect = 42,
}

impl MessageType {
    fn from_byte(byte: u8) -> Result<Self, ProtocolError> {
        use MessageType::*;
        Ok(match byte {
            0 => Hello,
            1 => HelloResponse,
            2 => StartStream,
            3 => StopStream,
            4 => StreamStarted,
            5 => KeyframeRequest,
            6 => InputEvent,
            7 => DisplayResolutionChange,
            8 => StreamScaleChange,
            9 => StreamRefreshRateChange,
            10 => SessionStateUpdate,
            11 => UnlockRequest,
            12 => UnlockResponse,
            13 => AppListRequest,
            14 => AppList,
            15 => SelectApp,
            16 => AppStreamStarted,
            17 => WindowAddedToStream,
            18 => WindowCooldownStarted,
            19 => WindowCooldownCancelled,
            20 => ReturnToAppSelection,
            21 => AppTerminated,
            22 => CloseWindowRequest,
            23 => StreamPaused,
            24 => StreamResumed,
            25 => CursorUpdate,
            26 => CursorPositionUpdate,
            27 => MenuBarUpdate,
            28 => MenuActionRequest,
            29 => MenuActionResult,
            30 => StartDesktopStream,
            31 => StopDesktopStream,
            32 => DesktopStreamStarted,
            33 => DesktopStreamStopped,
            34 => LoginDisplayReady,
            35 => LoginDisplayStopped,
            36 => ContentBoundsUpdate,
            37 => StreamMetricsUpdate,
            38 => QualityTestRequest,
            39 => QualityTestResult,
            40 => Ping,
            41 => Pong,
            42 => Disconnect,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

/// A decoded control message. The payload is kept as opaque TLV bytes;
/// callers use [`PayloadReader`]/[`PayloadWriter`] to interpret it
/// according to `msg_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub msg_type: MessageType,
    pub version: u8,
    pub payload: Bytes,
}

impl ControlMessage {
    #[must_use]
    pub fn new(msg_type: MessageType, payload: Bytes) -> Self {
        Self {
            msg_type,
            version: PROTOCOL_VERSION,
            payload,
        }
    }

    /// Serialize this message into its wire representation.
    #[must_use]
    pub fn encode(&self) -> BytesMut {
        let len = 2 + self.payload.len() as u32;
        let mut buf = BytesMut::with_capacity(4 + len as usize);
        buf.put_u32(len);
        buf.put_u8(self.msg_type as u8);
        buf.put_u8(self.version);
        buf.put_slice(&self.payload);
        buf
    }

    /// Attempt to decode one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if `buf` does not yet contain a complete
    /// frame — the caller must retain the bytes and retry once more
    /// data arrives. On success, returns the message and the number
    /// of bytes consumed from `buf`.
    pub fn decode(buf: &[u8]) -> Result<Option<(ControlMessage, usize)>, ProtocolError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let mut header = &buf[..4];
        let len = header.get_u32();
        if len < 2 {
            return Err(ProtocolError::MalformedPayload("frame shorter than type+version"));
        }
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(len));
        }

        let total = 4 + len as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let msg_type = MessageType::from_byte(buf[4])?;
        let version = buf[5];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }
        let payload = Bytes::copy_from_slice(&buf[6..total]);

        Ok(Some((
            ControlMessage {
                msg_type,
                version,
                payload,
            },
            total,
        )))
    }
}

/// Appends TLV-encoded fields to a payload buffer. Tags are
/// caller-defined small integers scoped to a single message type.
#[derive(Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bytes(&mut self, tag: u8, value: &[u8]) -> &mut Self {
        self.buf.put_u8(tag);
        self.buf.put_u16(value.len() as u16);
        self.buf.put_slice(value);
        self
    }

    pub fn put_str(&mut self, tag: u8, value: &str) -> &mut Self {
        self.put_bytes(tag, value.as_bytes())
    }

    pub fn put_u8(&mut self, tag: u8, value: u8) -> &mut Self {
        self.put_bytes(tag, &[value])
    }

    pub fn put_u16(&mut self, tag: u8, value: u16) -> &mut Self {
        self.put_bytes(tag, &value.to_be_bytes())
    }

    pub fn put_u32(&mut self, tag: u8, value: u32) -> &mut Self {
        self.put_bytes(tag, &value.to_be_bytes())
    }

    pub fn put_u64(&mut self, tag: u8, value: u64) -> &mut Self {
        self.put_bytes(tag, &value.to_be_bytes())
    }

    pub fn put_f32(&mut self, tag: u8, value: f32) -> &mut Self {
        self.put_bytes(tag, &value.to_be_bytes())
    }

    pub fn put_bool(&mut self, tag: u8, value: bool) -> &mut Self {
        self.put_u8(tag, u8::from(value))
    }

    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads TLV fields out of a decoded payload into a tag → bytes map,
/// parsed once up front so repeated lookups don't re-scan the buffer.
pub struct PayloadReader {
    fields: std::collections::HashMap<u8, Bytes>,
}

impl PayloadReader {
    pub fn parse(mut payload: Bytes) -> Result<Self, ProtocolError> {
        let mut fields = std::collections::HashMap::new();
        while payload.has_remaining() {
            if payload.remaining() < 3 {
                return Err(ProtocolError::MalformedPayload("truncated TLV header"));
            }
            let tag = payload.get_u8();
            let len = payload.get_u16() as usize;
            if payload.remaining() < len {
                return Err(ProtocolError::MalformedPayload("truncated TLV value"));
            }
            let value = payload.split_to(len);
            fields.insert(tag, value);
        }
        Ok(Self { fields })
    }

    #[must_use]
    pub fn bytes(&self, tag: u8) -> Option<&Bytes> {
        self.fields.get(&tag)
    }

    pub fn str(&self, tag: u8) -> Result<Option<&str>, ProtocolError> {
        match self.fields.get(&tag) {
            Some(b) => std::str::from_utf8(b)
                .map(Some)
                .map_err(|_| ProtocolError::MalformedPayload("invalid UTF-8")),
            None => Ok(None),
        }
    }

    pub fn u8(&self, tag: u8) -> Option<u8> {
        self.fields.get(&tag).and_then(|b| b.first().copied())
    }

    pub fn u16(&self, tag: u8) -> Option<u16> {
        self.fields
            .get(&tag)
            .and_then(|b| b.as_ref().try_into().ok())
            .map(u16::from_be_bytes)
    }

    pub fn u32(&self, tag: u8) -> Option<u32> {
        self.fields
            .get(&tag)
            .and_then(|b| b.as_ref().try_into().ok())
            .map(u32::from_be_bytes)
    }

    pub fn u64(&self, tag: u8) -> Option<u64> {
        self.fields
            .get(&tag)
            .and_then(|b| b.as_ref().try_into().ok())
            .map(u64::from_be_bytes)
    }

    pub fn f32(&self, tag: u8) -> Option<f32> {
        self.fields
            .get(&tag)
            .and_then(|b| b.as_ref().try_into().ok())
            .map(f32::from_be_bytes)
    }

    pub fn bool(&self, tag: u8) -> Option<bool> {
        self.u8(tag).map(|b| b != 0)
    }
}

/// Build the 12-byte UDP data-frame header for `stream_id`.
#[must_use]
pub fn encode_data_header(stream_id: u16) -> [u8; DATA_HEADER_LEN] {
    let mut header = [0u8; DATA_HEADER_LEN];
    header[..4].copy_from_slice(&DATA_MAGIC);
    header[4..6].copy_from_slice(&stream_id.to_le_bytes());
    header
}

/// Parse a UDP data-frame or registration header, returning the
/// stream id and the remaining payload slice.
pub fn decode_data_header(datagram: &[u8]) -> Result<(u16, &[u8]), ProtocolError> {
    if datagram.len() < DATA_HEADER_LEN {
        return Err(ProtocolError::ShortDatagram);
    }
    if datagram[..4] != DATA_MAGIC {
        return Err(ProtocolError::BadMagic);
    }
    let stream_id = u16::from_le_bytes([datagram[4], datagram[5]]);
    Ok((stream_id, &datagram[DATA_HEADER_LEN..]))
}

/// Quality-probe packet header, per §4.A / §4.M.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProbeHeader {
    pub test_id: uuid::Uuid,
    pub stage_id: u16,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub payload_len: u16,
}

impl QualityProbeHeader {
    const LEN: usize = 4 + 16 + 2 + 4 + 8 + 2;

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&QUALITY_MAGIC);
        buf.extend_from_slice(self.test_id.as_bytes());
        buf.extend_from_slice(&self.stage_id.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp_ns.to_be_bytes());
        buf.extend_from_slice(&self.payload_len.to_be_bytes());
        buf
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, ProtocolError> {
        if datagram.len() < Self::LEN {
            return Err(ProtocolError::ShortDatagram);
        }
        if datagram[..4] != QUALITY_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let test_id = uuid::Uuid::from_slice(&datagram[4..20])
            .map_err(|_| ProtocolError::MalformedPayload("bad test id"))?;
        let stage_id = u16::from_be_bytes([datagram[20], datagram[21]]);
        let sequence = u32::from_be_bytes(datagram[22..26].try_into().unwrap());
        let timestamp_ns = u64::from_be_bytes(datagram[26..34].try_into().unwrap());
        let payload_len = u16::from_be_bytes([datagram[34], datagram[35]]);
        Ok(Self {
            test_id,
            stage_id,
            sequence,
            timestamp_ns,
            payload_len,
        })
    }
}
