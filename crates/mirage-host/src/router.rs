//! Message router (§4.K).
//!
//! A single receive loop per TCP connection decodes as many complete
//! frames as the buffer holds and splits them into a hot input path
//! and a cold control path, so input latency is never bounded by
//! control-plane work (§5 concurrency model, §9 design note: replace
//! the main-actor with a task draining a command channel, input kept
//! on its own channel).

use bytes::BytesMut;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::protocol::{ControlMessage, MessageType, ProtocolError};

/// Dispatch lane a decoded message belongs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedMessage {
    /// Hot path: processed on the dedicated input-dispatch task.
    Input(ControlMessage),
    /// Cold path: processed sequentially on the main handler task.
    Control(ControlMessage),
}

/// Best-effort guess at how many bytes the frame that just failed to
/// decode occupies, so a malformed frame can be skipped without
/// discarding unrelated frames already buffered behind it. Falls back
/// to the whole buffer if even the 4-byte length prefix is missing.
fn frame_len_hint(buf: &[u8]) -> usize {
    if buf.len() < 4 {
        return buf.len();
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    (4 + len).max(4)
}

fn lane(msg_type: MessageType) -> fn(ControlMessage) -> RoutedMessage {
    if msg_type == MessageType::InputEvent {
        RoutedMessage::Input
    } else {
        RoutedMessage::Control
    }
}

/// Decodes as many complete frames as `buf` currently holds, routing
/// each to its lane via `emit`. Incomplete trailing bytes are left in
/// `buf` for the next read.
pub fn drain_frames(
    buf: &mut BytesMut,
    mut emit: impl FnMut(RoutedMessage),
) -> Result<(), ProtocolError> {
    loop {
        match ControlMessage::decode(buf) {
            Ok(Some((message, consumed))) => {
                trace!(?message.msg_type, consumed, "decoded control frame");
                let route = lane(message.msg_type);
                emit(route(message));
                let _ = buf.split_to(consumed);
            }
            Ok(None) => return Ok(()),
            Err(err) => {
                // Protocol violations drop only the offending frame,
                // not the whole buffer, so frames already queued
                // behind it still get a chance (§7 "Protocol
                // violation": log and ignore the single message).
                warn!(%err, "dropping malformed frame");
                let skip = frame_len_hint(buf).min(buf.len());
                let _ = buf.split_to(skip);
                return Err(err);
            }
        }
    }
}

/// Per-connection router: owns the two outgoing channels a decoded
/// message may be routed onto.
pub struct MessageRouter {
    input_tx: mpsc::Sender<ControlMessage>,
    control_tx: mpsc::Sender<ControlMessage>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(input_tx: mpsc::Sender<ControlMessage>, control_tx: mpsc::Sender<ControlMessage>) -> Self {
        Self { input_tx, control_tx }
    }

    /// Feed newly received bytes, routing every complete frame found.
    /// Returns the number of frames routed. A malformed frame anywhere
    /// in `buf` is reported as an error, but frames decoded before it
    /// in the same read are still forwarded, per §7's "log and ignore
    /// the single message" — a read that had the bad luck to end on a
    /// corrupt frame shouldn't lose the good ones queued ahead of it.
    pub async fn feed(&self, buf: &mut BytesMut) -> Result<usize, ProtocolError> {
        let mut routed = Vec::new();
        let result = drain_frames(buf, |msg| routed.push(msg));
        let count = routed.len();
        for msg in routed {
            match msg {
                RoutedMessage::Input(m) => {
                    let _ = self.input_tx.send(m).await;
                }
                RoutedMessage::Control(m) => {
                    let _ = self.control_tx.send(m).await;
                }
            }
        }
        result?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(msg_type: MessageType) -> BytesMut {
        ControlMessage::new(msg_type, Bytes::new()).encode()
    }

    #[test]
    fn input_events_route_to_hot_lane() {
        let mut buf = frame(MessageType::InputEvent);
        let mut routed = Vec::new();
        drain_frames(&mut buf, |m| routed.push(m)).unwrap();
        assert!(matches!(routed[0], RoutedMessage::Input(_)));
    }

    #[test]
    fn everything_else_routes_to_cold_lane() {
        let mut buf = frame(MessageType::Ping);
        let mut routed = Vec::new();
        drain_frames(&mut buf, |m| routed.push(m)).unwrap();
        assert!(matches!(routed[0], RoutedMessage::Control(_)));
    }

    #[test]
    fn drains_multiple_frames_in_fifo_order() {
        let mut buf = frame(MessageType::Ping);
        buf.extend_from_slice(&frame(MessageType::Pong));
        let mut routed = Vec::new();
        drain_frames(&mut buf, |m| routed.push(m)).unwrap();
        assert_eq!(routed.len(), 2);
        assert!(matches!(routed[0], RoutedMessage::Control(ref m) if m.msg_type == MessageType::Ping));
        assert!(matches!(routed[1], RoutedMessage::Control(ref m) if m.msg_type == MessageType::Pong));
    }

    #[test]
    fn partial_frame_is_retained_for_next_read() {
        let full = frame(MessageType::Ping);
        let mut buf = BytesMut::from(&full[..full.len() - 1]);
        let mut routed = Vec::new();
        drain_frames(&mut buf, |m| routed.push(m)).unwrap();
        assert!(routed.is_empty());
        assert_eq!(buf.len(), full.len() - 1);
    }

    #[test]
    fn malformed_frame_does_not_discard_frames_queued_behind_it() {
        let mut buf = frame(MessageType::Ping);
        buf[5] = 0xff; // corrupt the version byte of the first frame
        buf.extend_from_slice(&frame(MessageType::Pong));
        let mut routed = Vec::new();
        let err = drain_frames(&mut buf, |m| routed.push(m)).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(0xff)));
        assert!(routed.is_empty());
        // The well-formed Pong frame is still in `buf` for the caller
        // to decode on the next call.
        drain_frames(&mut buf, |m| routed.push(m)).unwrap();
        assert!(matches!(routed[0], RoutedMessage::Control(ref m) if m.msg_type == MessageType::Pong));
    }

    #[tokio::test]
    async fn feed_forwards_frames_decoded_before_a_malformed_one() {
        let (input_tx, mut input_rx) = mpsc::channel(8);
        let (control_tx, mut control_rx) = mpsc::channel(8);
        let router = MessageRouter::new(input_tx, control_tx);
        let mut buf = frame(MessageType::Ping);
        let bad_offset = buf.len() + 5;
        buf.extend_from_slice(&frame(MessageType::Pong));
        buf[bad_offset] = 0xff;
        let err = router.feed(&mut buf).await.unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedVersion(0xff)));
        assert!(control_rx.recv().await.is_some(), "the leading Ping must still be forwarded");
        assert!(input_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn router_forwards_to_channels() {
        let (input_tx, mut input_rx) = mpsc::channel(8);
        let (control_tx, mut control_rx) = mpsc::channel(8);
        let router = MessageRouter::new(input_tx, control_tx);
        let mut buf = frame(MessageType::InputEvent);
        buf.extend_from_slice(&frame(MessageType::Ping));
        let count = router.feed(&mut buf).await.unwrap();
        assert_eq!(count, 2);
        assert!(input_rx.recv().await.is_some());
        assert!(control_rx.recv().await.is_some());
    }
}
