//! Trust & approval gate (§4.C).
//!
//! Consults an optional trust provider, then falls through to a host
//! delegate's approval decision. The gate races three outcomes —
//! approval, connection-closure, and a timeout — and whichever
//! resolves first wins; the design note calls this out explicitly as
//! a `select!` over three futures replacing the original's
//! continuation-box pattern.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{info, warn};

/// Peer identity passed to the trust provider.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    pub device_id: uuid::Uuid,
    pub device_name: String,
}

/// Trust provider verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustVerdict {
    Trusted,
    Denied,
    RequiresApproval,
}

/// Consults an external trust store (out of scope for this crate —
/// see spec §1 "Deliberately out of scope").
#[async_trait::async_trait]
pub trait TrustProvider: Send + Sync {
    async fn evaluate(&self, identity: &PeerIdentity) -> TrustOutcome;
}

/// Either a verdict, or `Unavailable` when the provider couldn't
/// reach a decision (e.g. storage I/O error) — treated the same as
/// `RequiresApproval`.
#[derive(Debug, Clone)]
pub enum TrustOutcome {
    Verdict(TrustVerdict),
    Unavailable(String),
}

/// The host delegate callback invoked when approval is required.
/// Returns a receiver the gate races against closure/timeout.
pub trait ApprovalDelegate: Send + Sync {
    fn request_approval(&self, identity: &PeerIdentity) -> oneshot::Receiver<bool>;
}

/// Final result of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Accepted,
    Rejected,
    ConnectionClosed,
    TimedOut,
}

/// Default approval timeout (§4.C).
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the trust gate for `identity`.
///
/// `connection_closed` resolves when the peer's TCP connection drops
/// while approval is pending.
pub async fn run_gate(
    identity: &PeerIdentity,
    trust: Option<&dyn TrustProvider>,
    delegate: &dyn ApprovalDelegate,
    connection_closed: oneshot::Receiver<()>,
    timeout: Duration,
) -> GateOutcome {
    if let Some(provider) = trust {
        match provider.evaluate(identity).await {
            TrustOutcome::Verdict(TrustVerdict::Trusted) => {
                info!(device = %identity.device_name, "trust provider: trusted");
                return GateOutcome::Accepted;
            }
            TrustOutcome::Verdict(TrustVerdict::Denied) => {
                info!(device = %identity.device_name, "trust provider: denied");
                return GateOutcome::Rejected;
            }
            TrustOutcome::Verdict(TrustVerdict::RequiresApproval) => {}
            TrustOutcome::Unavailable(reason) => {
                warn!(device = %identity.device_name, %reason, "trust provider unavailable, falling back to approval");
            }
        }
    }

    let approval = delegate.request_approval(identity);
    race_approval(approval, connection_closed, timeout).await
}

async fn race_approval(
    approval: oneshot::Receiver<bool>,
    connection_closed: oneshot::Receiver<()>,
    timeout: Duration,
) -> GateOutcome {
    tokio::select! {
        result = approval => {
            match result {
                Ok(true) => GateOutcome::Accepted,
                Ok(false) | Err(_) => GateOutcome::Rejected,
            }
        }
        _ = connection_closed => GateOutcome::ConnectionClosed,
        () = tokio::time::sleep(timeout) => GateOutcome::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> PeerIdentity {
        PeerIdentity {
            device_id: uuid::Uuid::from_u128(1),
            device_name: "test-device".into(),
        }
    }

    #[tokio::test]
    async fn approval_accepted_wins_race() {
        let (tx, rx) = oneshot::channel();
        let (_closed_tx, closed_rx) = oneshot::channel();
        tx.send(true).unwrap();
        let outcome = race_approval(rx, closed_rx, Duration::from_secs(5)).await;
        assert_eq!(outcome, GateOutcome::Accepted);
    }

    #[tokio::test]
    async fn connection_closed_wins_when_first() {
        let (_tx, rx) = oneshot::channel::<bool>();
        let (closed_tx, closed_rx) = oneshot::channel();
        closed_tx.send(()).unwrap();
        let outcome = race_approval(rx, closed_rx, Duration::from_secs(5)).await;
        assert_eq!(outcome, GateOutcome::ConnectionClosed);
    }

    #[tokio::test]
    async fn timeout_fires_when_nothing_else_resolves() {
        let (_tx, rx) = oneshot::channel::<bool>();
        let (_closed_tx, _closed_rx) = oneshot::channel();
        let outcome = race_approval(rx, _closed_rx, Duration::from_millis(10)).await;
        assert_eq!(outcome, GateOutcome::TimedOut);
    }

    struct AlwaysTrust;
    #[async_trait::async_trait]
    impl TrustProvider for AlwaysTrust {
        async fn evaluate(&self, _identity: &PeerIdentity) -> TrustOutcome {
            TrustOutcome::Verdict(TrustVerdict::Trusted)
        }
    }

    struct NeverApprove;
    impl ApprovalDelegate for NeverApprove {
        fn request_approval(&self, _identity: &PeerIdentity) -> oneshot::Receiver<bool> {
            let (_tx, rx) = oneshot::channel();
            rx
        }
    }

    #[tokio::test]
    async fn trusted_verdict_short_circuits_approval() {
        let (_closed_tx, closed_rx) = oneshot::channel();
        let outcome = run_gate(
            &identity(),
            Some(&AlwaysTrust),
            &NeverApprove,
            closed_rx,
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(outcome, GateOutcome::Accepted);
    }
}
