//! Per-peer connection state.
//!
//! The state machine of a connection's life: `Connecting` when the socket
//! opens, `HandshakeSent` once our `version` is out, `Handshake` when the
//! peer's `version` arrives, `Ready` after `verack` plus one proven ping
//! round trip, `Closing` on misbehavior, timeout, or shutdown.
//!
//! This type tracks state and counters; sockets and message dispatch
//! belong to the node shell.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::debug;

use heron_chain::bloom::BloomFilter;

use crate::constants::{
    MAX_PEER_LIFETIME, MAX_PEER_MESSAGES, PING_CUTOFF, INVALID_ANNOUNCEMENT_PENALTY,
};
use crate::protocol::external::{Nonce, Version};

/// Where a connection is in its life.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PeerState {
    /// Socket open, nothing sent.
    Connecting,
    /// Our `version` is out.
    HandshakeSent,
    /// Their `version` arrived; waiting on `verack` and the first ping.
    Handshake,
    /// Fully negotiated; ordinary operation.
    Ready,
    /// Being torn down; requests released.
    Closing,
}

/// The ways a peer earns disconnection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Misbehavior {
    /// Sent bytes that did not parse.
    Malformed,
    /// Announced an object that failed consensus checks.
    InvalidAnnouncement,
    /// Held a block request with no progress for too long.
    StalledBlockRequest,
    /// Never answered the initial ping.
    PingTimeout,
    /// Exceeded the per-connection message budget.
    TooManyMessages,
    /// Exceeded the per-connection lifetime.
    LifetimeExceeded,
}

impl Misbehavior {
    /// The persisted-score penalty this behavior costs.
    pub fn penalty(&self) -> i32 {
        match self {
            Misbehavior::Malformed | Misbehavior::InvalidAnnouncement => {
                INVALID_ANNOUNCEMENT_PENALTY
            }
            // Slowness is not malice; a single point discourages redial
            // preference without banning.
            Misbehavior::StalledBlockRequest
            | Misbehavior::PingTimeout
            | Misbehavior::TooManyMessages
            | Misbehavior::LifetimeExceeded => 1,
        }
    }
}

/// One connected peer.
pub struct Peer {
    pub id: u64,
    pub addr: SocketAddr,
    state: PeerState,
    /// Their handshake, once received.
    version: Option<Version>,
    /// The bloom filter they loaded, if any.
    pub filter: BloomFilter,
    connected_at: Instant,
    messages_received: u64,
    verack_received: bool,
    /// The outstanding ping, if one is in flight.
    ping_sent: Option<(Nonce, Instant)>,
    /// The last measured ping round trip.
    ping_roundtrip: Option<Duration>,
    /// An in-progress block download: (started, last progress).
    block_request_progress: Option<(Instant, Instant)>,
}

impl Peer {
    pub fn new(id: u64, addr: SocketAddr) -> Peer {
        Peer {
            id,
            addr,
            state: PeerState::Connecting,
            version: None,
            filter: BloomFilter::empty(),
            connected_at: Instant::now(),
            messages_received: 0,
            verack_received: false,
            ping_sent: None,
            ping_roundtrip: None,
            block_request_progress: None,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == PeerState::Ready
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// Our `version` went out.
    pub fn version_sent(&mut self) {
        if self.state == PeerState::Connecting {
            self.state = PeerState::HandshakeSent;
        }
    }

    /// Their `version` arrived.
    pub fn version_received(&mut self, version: Version) {
        self.version = Some(version);
        if self.state == PeerState::HandshakeSent {
            self.state = PeerState::Handshake;
        }
        self.maybe_ready();
    }

    /// Their `verack` arrived.
    pub fn verack_received(&mut self) {
        self.verack_received = true;
        self.maybe_ready();
    }

    /// We pinged them.
    pub fn ping_sent(&mut self, nonce: Nonce, now: Instant) {
        self.ping_sent = Some((nonce, now));
    }

    /// They answered a ping; `Ready` once the handshake is otherwise
    /// complete.
    pub fn pong_received(&mut self, nonce: Nonce, now: Instant) {
        if let Some((expected, sent_at)) = self.ping_sent {
            if expected == nonce {
                self.ping_roundtrip = Some(now.duration_since(sent_at));
                self.ping_sent = None;
                self.maybe_ready();
            }
        }
    }

    fn maybe_ready(&mut self) {
        if self.state == PeerState::Handshake
            && self.verack_received
            && self.ping_roundtrip.is_some()
        {
            self.state = PeerState::Ready;
            debug!(peer = self.id, addr = %self.addr, "peer ready");
        }
    }

    /// Count an inbound message; enforce the per-connection budgets.
    ///
    /// Byte accounting lives in the codec's metrics, labeled per peer
    /// address; only the message and lifetime budgets are tracked here.
    pub fn record_message(&mut self, now: Instant) -> Result<(), Misbehavior> {
        self.messages_received += 1;
        if self.messages_received > MAX_PEER_MESSAGES {
            return Err(Misbehavior::TooManyMessages);
        }
        if now.duration_since(self.connected_at) > MAX_PEER_LIFETIME {
            return Err(Misbehavior::LifetimeExceeded);
        }
        Ok(())
    }

    /// A block request was issued to this peer.
    pub fn block_request_started(&mut self, now: Instant) {
        self.block_request_progress = Some((now, now));
    }

    /// Bytes arrived for the in-progress block.
    pub fn block_request_progressed(&mut self, now: Instant) {
        if let Some((started, _)) = self.block_request_progress {
            self.block_request_progress = Some((started, now));
        }
    }

    /// The block finished downloading.
    pub fn block_request_finished(&mut self) {
        self.block_request_progress = None;
    }

    /// Periodic liveness check: the initial ping cutoff and the stalled
    /// block rule.
    pub fn check_liveness(&mut self, now: Instant, stall_after: Duration) -> Result<(), Misbehavior> {
        if let Some((_, sent_at)) = self.ping_sent {
            if self.ping_roundtrip.is_none() && now.duration_since(sent_at) > PING_CUTOFF {
                return Err(Misbehavior::PingTimeout);
            }
        }
        if let Some((_, last_progress)) = self.block_request_progress {
            if now.duration_since(last_progress) > stall_after {
                return Err(Misbehavior::StalledBlockRequest);
            }
        }
        Ok(())
    }

    /// Tear the connection down.
    pub fn close(&mut self) {
        self.state = PeerState::Closing;
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn ping_roundtrip(&self) -> Option<Duration> {
        self.ping_roundtrip
    }
}

#[cfg(test)]
mod tests {
    use heron_chain::block::Height;

    use crate::constants::{BLOCK_STALL_TIMEOUT, CURRENT_VERSION};
    use crate::protocol::external::PeerServices;

    use super::*;

    fn sample_version() -> Version {
        Version::new(
            CURRENT_VERSION,
            ([10, 0, 0, 1], 8333).into(),
            PeerServices::FULL_NODE,
            PeerServices::FULL_NODE | PeerServices::CASH,
            ([10, 0, 0, 2], 8333).into(),
            Nonce(42),
            "/other:1.0/".to_string(),
            Height(0),
            true,
        )
    }

    #[test]
    fn handshake_requires_verack_and_a_ping_round_trip() {
        heron_test::init();

        let mut peer = Peer::new(1, ([10, 0, 0, 1], 8333).into());
        assert_eq!(peer.state(), PeerState::Connecting);

        peer.version_sent();
        assert_eq!(peer.state(), PeerState::HandshakeSent);

        peer.version_received(sample_version());
        assert_eq!(peer.state(), PeerState::Handshake);

        peer.verack_received();
        assert_eq!(peer.state(), PeerState::Handshake, "still needs a pong");

        let now = Instant::now();
        peer.ping_sent(Nonce(7), now);
        // A pong with the wrong nonce proves nothing.
        peer.pong_received(Nonce(8), now);
        assert_eq!(peer.state(), PeerState::Handshake);

        peer.pong_received(Nonce(7), now + Duration::from_millis(80));
        assert_eq!(peer.state(), PeerState::Ready);
        assert!(peer.ping_roundtrip().unwrap() >= Duration::from_millis(80));
    }

    #[test]
    fn budgets_and_stalls_are_misbehavior() {
        heron_test::init();

        let mut peer = Peer::new(1, ([10, 0, 0, 1], 8333).into());
        let now = Instant::now();

        // The lifetime budget.
        let old = now + MAX_PEER_LIFETIME + Duration::from_secs(1);
        assert_eq!(
            peer.record_message(old),
            Err(Misbehavior::LifetimeExceeded)
        );

        // The stalled block rule.
        peer.block_request_started(now);
        assert!(peer.check_liveness(now, BLOCK_STALL_TIMEOUT).is_ok());
        let later = now + BLOCK_STALL_TIMEOUT + Duration::from_secs(1);
        assert_eq!(
            peer.check_liveness(later, BLOCK_STALL_TIMEOUT),
            Err(Misbehavior::StalledBlockRequest)
        );

        peer.block_request_progressed(later);
        assert!(peer.check_liveness(later, BLOCK_STALL_TIMEOUT).is_ok());
    }

    #[test]
    fn penalties_match_severity() {
        heron_test::init();

        assert_eq!(Misbehavior::InvalidAnnouncement.penalty(), 5);
        assert_eq!(Misbehavior::StalledBlockRequest.penalty(), 1);
    }
}
