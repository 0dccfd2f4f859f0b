//! End-to-end scenario tests (§8 "End-to-end scenarios"), driving the
//! public `Host`/session/stream/trust API in-process rather than over
//! real sockets — the wire codec and connection layer are covered by
//! their own unit tests in `protocol.rs`/`connection.rs`.

use std::time::Duration;

use mirage_encode::EncoderConfig;
use mirage_host::appstream::AppListGate;
use mirage_host::host::{HelloOutcome, Host};
use mirage_host::session::SessionState;
use mirage_host::stream::StreamFlags;
use mirage_host::trust::{GateOutcome, PeerIdentity, TrustOutcome, TrustProvider, TrustVerdict};
use tokio::sync::oneshot;

fn ipad_identity() -> PeerIdentity {
    PeerIdentity {
        device_id: uuid::Uuid::parse_str("deadbeef-0000-0000-0000-000000000000").unwrap(),
        device_name: "iPad".into(),
    }
}

struct AlwaysTrust;
#[async_trait::async_trait]
impl TrustProvider for AlwaysTrust {
    async fn evaluate(&self, _identity: &PeerIdentity) -> TrustOutcome {
        TrustOutcome::Verdict(TrustVerdict::Trusted)
    }
}

struct NeverApprove;
impl mirage_host::trust::ApprovalDelegate for NeverApprove {
    fn request_approval(&self, _identity: &PeerIdentity) -> oneshot::Receiver<bool> {
        let (_tx, rx) = oneshot::channel();
        rx
    }
}

// S1: trusted hello is accepted and the client observes an active session.
#[tokio::test]
async fn s1_trusted_hello_is_accepted() {
    let (_closed_tx, closed_rx) = oneshot::channel();
    let outcome = mirage_host::trust::run_gate(
        &ipad_identity(),
        Some(&AlwaysTrust),
        &NeverApprove,
        closed_rx,
        Duration::from_secs(5),
    )
    .await;
    assert_eq!(outcome, GateOutcome::Accepted);

    let mut host = Host::new(9847, 9848);
    let hello = host.handle_hello(ipad_identity().device_id, "iPad".into(), "ipad".into());
    assert_eq!(hello, HelloOutcome::Accepted);
    assert_eq!(host.session.state(), SessionState::Active);
}

// S2: a second hello while the first client is alive is rejected.
#[test]
fn s2_second_concurrent_hello_is_rejected() {
    let mut host = Host::new(9847, 9848);
    let first = host.handle_hello(uuid::Uuid::from_u128(0xDEAD_BEEF), "iPad".into(), "ipad".into());
    assert_eq!(first, HelloOutcome::Accepted);

    let second = host.handle_hello(uuid::Uuid::from_u128(0xCAFE_BABE), "Mac".into(), "mac".into());
    assert_eq!(second, HelloOutcome::RejectedSlotTaken);
}

// S3: startStream announces dimensions/frame rate and gates frames on
// UDP registration.
#[test]
fn s3_start_stream_gates_frames_on_udp_registration() {
    let mut host = Host::new(9847, 9848);
    host.handle_hello(uuid::Uuid::from_u128(1), "iPad".into(), "ipad".into());

    let config = EncoderConfig {
        width: 1280,
        height: 720,
        fps: 120,
        ..EncoderConfig::default()
    }
    .clamped();
    let stream_id = host
        .start_stream(42, StreamFlags::default(), config)
        .expect("session is active");

    let stream = host.stream(stream_id).unwrap();
    let t0 = stream.dimension_token();
    assert!(!stream.may_emit_frames(), "no frames before UDP registration");

    host.register_stream_udp(stream_id);
    let stream = host.stream(stream_id).unwrap();
    assert!(stream.may_emit_frames());
    assert_eq!(stream.dimension_token(), t0);
}

// S4: a resolution change bumps the dimension token strictly upward.
#[test]
fn s4_resolution_change_bumps_dimension_token() {
    let mut host = Host::new(9847, 9848);
    host.handle_hello(uuid::Uuid::from_u128(1), "iPad".into(), "ipad".into());
    let stream_id = host
        .start_stream(42, StreamFlags::default(), EncoderConfig::default())
        .unwrap();
    host.register_stream_udp(stream_id);

    let t0 = host.stream(stream_id).unwrap().dimension_token();
    let announcement = host
        .stream_mut(stream_id)
        .unwrap()
        .update_resolution(1920, 1080)
        .expect("resolution actually changed");
    assert!(announcement.dimension_token > t0);
    assert_eq!((announcement.width, announcement.height), (1920, 1080));
}

// S5: a lock transition mints a new token and refuses startStream
// until the session returns to active.
#[test]
fn s5_lock_transition_mints_token_and_blocks_new_streams() {
    let mut host = Host::new(9847, 9848);
    host.handle_hello(uuid::Uuid::from_u128(1), "iPad".into(), "ipad".into());
    let before = host.session.token().clone();

    let effect = host.apply_session_transition(SessionState::Locked);
    assert_eq!(effect, mirage_host::host::SessionTransitionEffect::StartLoginDisplay);
    assert_ne!(host.session.token(), &before);

    let result = host.start_stream(7, StreamFlags::default(), EncoderConfig::default());
    assert_eq!(result, Err(SessionState::Locked));
}

// S6: an unlockRequest carrying a stale token is rejected as expired
// and reports the new token with retry still allowed.
#[test]
fn s6_stale_unlock_token_reports_session_expired() {
    let mut host = Host::new(9847, 9848);
    let old_token = host.session.token().as_str().to_string();
    host.apply_session_transition(SessionState::Locked);

    let outcome = host.session.handle_unlock(&old_token, false, true);
    assert!(!outcome.success);
    assert_eq!(outcome.error, Some(mirage_host::session::UnlockError::SessionExpired));
    assert!(outcome.can_retry);
    assert!(outcome.new_session_token.is_some());
}

// S7: appListRequest is deferred while a desktop stream is active and
// released exactly once when it stops.
#[test]
fn s7_app_list_request_deferred_until_desktop_stream_stops() {
    let mut gate = AppListGate::new();
    gate.set_desktop_stream_active(true);

    let client = uuid::Uuid::from_u128(1);
    let answered_immediately = gate.request(client);
    assert!(!answered_immediately, "must be queued while desktop stream is active");

    let released = gate.set_desktop_stream_active(false);
    assert_eq!(released, vec![client]);

    // A fresh request once the stream is stopped is answered right away.
    assert!(gate.request(uuid::Uuid::from_u128(2)));
}
