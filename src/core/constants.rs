//! Protocol constants.
//!
//! Timing bounds and wire limits shared across the transport adapters and
//! the session layer.

use std::time::Duration;

// =============================================================================
// CONNECTION ESTABLISHMENT
// =============================================================================

/// Wall-clock bound on a single adapter connection attempt.
///
/// On expiry the attempt is abandoned and the session manager advances to
/// the next candidate transport.
pub const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the best-effort negotiation request.
pub const NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(3);

// =============================================================================
// HTTP PATHS
// =============================================================================

/// Negotiation endpoint, relative to the derived HTTP origin.
pub const NEGOTIATE_PATH: &str = "/negotiate";

/// Peer signaling offer endpoint.
pub const RTC_OFFER_PATH: &str = "/rtc/offer";

/// Peer signaling candidate endpoint.
pub const RTC_ICE_PATH: &str = "/rtc/ice";

// =============================================================================
// WIRE LIMITS
// =============================================================================

/// Maximum encoded size of a single channel frame.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Maximum payload carried in one peer/state datagram.
pub const MAX_DATAGRAM_PAYLOAD: usize = 1200;

// =============================================================================
// HEARTBEAT
// =============================================================================

/// Fixed interval between control-channel pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

// =============================================================================
// PEER CONTROL SUB-CHANNEL RETRANSMISSION
// =============================================================================

/// Retransmission timeout before the first RTT sample.
pub const INITIAL_RTO: Duration = Duration::from_millis(500);

/// Minimum retransmission timeout.
pub const MIN_RTO: Duration = Duration::from_millis(100);

/// Maximum retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_secs(10);

/// Retransmission attempts before the sub-channel is considered dead.
pub const MAX_RETRANSMITS: u32 = 10;

/// Receive-side reorder window of the control sub-channel, in sequence
/// numbers past the next expected one. Sequences beyond it are dropped
/// and covered by the sender's retransmission.
pub const PEER_REORDER_WINDOW: u64 = 1024;

/// Interval between connectivity probes during peer establishment.
pub const PEER_PROBE_INTERVAL: Duration = Duration::from_millis(250);

// =============================================================================
// QUEUE DEPTHS
// =============================================================================

/// Depth of the outbound frame queue per connection.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Depth of the inbound event queue per connection.
pub const EVENT_QUEUE_DEPTH: usize = 256;
