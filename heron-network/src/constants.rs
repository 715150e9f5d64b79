//! Protocol constants.

use std::time::Duration;

use crate::protocol::external::ProtocolVersion;

/// The protocol version this node speaks.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion(70_015);

/// The lowest protocol version worth talking to.
pub const MIN_PEER_VERSION: ProtocolVersion = ProtocolVersion(31_800);

/// The user agent advertised in handshakes.
pub const USER_AGENT: &str = "/heron:0.1.0/";

/// How long a requested hash stays reserved for one peer before another
/// may be asked.
pub const REQUEST_EXPIRY: Duration = Duration::from_secs(4);

/// The global bound on block bodies in flight across all peers.
pub const MAX_BLOCK_REQUESTS: usize = 16;

/// A peer that holds a block request without progress this long is
/// abandoned.
pub const BLOCK_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// The longest a peer may take to answer the initial liveness ping.
pub const PING_CUTOFF: Duration = Duration::from_secs(10);

/// Messages a peer may send over one connection.
pub const MAX_PEER_MESSAGES: u64 = 5000;

/// Lifetime ceiling of one connection.
pub const MAX_PEER_LIFETIME: Duration = Duration::from_secs(1800);

/// The byte budget for queued, not-yet-validated blocks; above it no new
/// block requests are issued.
pub const PENDING_BLOCK_BYTE_BUDGET: usize = 100 * 1024 * 1024;

/// The score decrement for announcing an invalid header or block.
pub const INVALID_ANNOUNCEMENT_PENALTY: i32 = 5;

/// Peers at or below this score are not redialed.
pub const REDIAL_SCORE_FLOOR: i32 = 0;
