//! Peer datagram framing and the reliable control sub-channel.
//!
//! The peer link carries everything over UDP, so the control channel's
//! ordering and delivery guarantees are rebuilt in-protocol: sequenced
//! sends with cumulative acks and RTO-driven retransmission on the way
//! out, reorder buffering on the way in. State payloads bypass all of
//! it. Probes establish reachability before either channel opens.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::core::constants::{MAX_RETRANSMITS, PEER_REORDER_WINDOW};
use crate::protocol::ChannelFrame;

/// A datagram that could not be parsed.
#[derive(Debug, Error)]
pub enum DatagramError {
    /// Fewer bytes than the header requires.
    #[error("datagram too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length for this datagram shape.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },
    /// First byte is not a known datagram tag.
    #[error("unknown datagram tag {0:#04x}")]
    UnknownTag(u8),
}

const TAG_CONTROL: u8 = 1;
const TAG_CONTROL_ACK: u8 = 2;
const TAG_STATE: u8 = 3;
const TAG_PROBE: u8 = 4;
const TAG_PROBE_ACK: u8 = 5;

/// Wire format of one peer UDP datagram: a tag byte, then the variant's
/// fixed header in little-endian, then the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerDatagram {
    /// Sequenced control payload, retransmitted until acknowledged.
    Control {
        /// Sender-assigned sequence number, starting at 1.
        seq: u64,
        /// Encoded frame bytes.
        payload: Vec<u8>,
    },
    /// Cumulative acknowledgment of control sequences.
    ControlAck {
        /// Highest sequence delivered in order so far.
        cumulative: u64,
    },
    /// Fire-and-forget state payload.
    State {
        /// Encoded frame bytes.
        payload: Vec<u8>,
    },
    /// Reachability probe sent during and after connection setup.
    Probe {
        /// Echo token.
        token: u64,
    },
    /// Echo of a received probe.
    ProbeAck {
        /// Token from the probe being answered.
        token: u64,
    },
}

impl PeerDatagram {
    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Control { seq, payload } => {
                let mut out = Vec::with_capacity(9 + payload.len());
                out.push(TAG_CONTROL);
                out.extend_from_slice(&seq.to_le_bytes());
                out.extend_from_slice(payload);
                out
            }
            Self::ControlAck { cumulative } => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_CONTROL_ACK);
                out.extend_from_slice(&cumulative.to_le_bytes());
                out
            }
            Self::State { payload } => {
                let mut out = Vec::with_capacity(1 + payload.len());
                out.push(TAG_STATE);
                out.extend_from_slice(payload);
                out
            }
            Self::Probe { token } => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_PROBE);
                out.extend_from_slice(&token.to_le_bytes());
                out
            }
            Self::ProbeAck { token } => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_PROBE_ACK);
                out.extend_from_slice(&token.to_le_bytes());
                out
            }
        }
    }

    /// Parse wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, DatagramError> {
        let (&tag, rest) = bytes.split_first().ok_or(DatagramError::TooShort {
            expected: 1,
            actual: 0,
        })?;

        let read_u64 = |rest: &[u8]| -> Result<u64, DatagramError> {
            let arr: [u8; 8] = rest
                .get(..8)
                .and_then(|s| s.try_into().ok())
                .ok_or(DatagramError::TooShort {
                    expected: 9,
                    actual: bytes.len(),
                })?;
            Ok(u64::from_le_bytes(arr))
        };

        match tag {
            TAG_CONTROL => Ok(Self::Control {
                seq: read_u64(rest)?,
                payload: rest[8..].to_vec(),
            }),
            TAG_CONTROL_ACK => Ok(Self::ControlAck {
                cumulative: read_u64(rest)?,
            }),
            TAG_STATE => Ok(Self::State {
                payload: rest.to_vec(),
            }),
            TAG_PROBE => Ok(Self::Probe {
                token: read_u64(rest)?,
            }),
            TAG_PROBE_ACK => Ok(Self::ProbeAck {
                token: read_u64(rest)?,
            }),
            other => Err(DatagramError::UnknownTag(other)),
        }
    }
}

#[derive(Debug)]
struct InFlight {
    seq: u64,
    payload: Vec<u8>,
    sent_at: Instant,
    retransmits: u32,
}

/// Sender side of the reliable control sub-channel.
#[derive(Debug, Default)]
pub struct ReliableOutbound {
    next_seq: u64,
    in_flight: VecDeque<InFlight>,
}

impl ReliableOutbound {
    /// Assign the next sequence to a payload and track it for
    /// retransmission. Returns the datagram to send.
    pub fn push(&mut self, payload: Vec<u8>, now: Instant) -> PeerDatagram {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.in_flight.push_back(InFlight {
            seq,
            payload: payload.clone(),
            sent_at: now,
            retransmits: 0,
        });
        PeerDatagram::Control { seq, payload }
    }

    /// Apply a cumulative ack, dropping everything at or below it.
    ///
    /// Returns an RTT sample from the newest acked entry, unless that
    /// entry was ever retransmitted (Karn's rule).
    pub fn acknowledge(&mut self, cumulative: u64, now: Instant) -> Option<Duration> {
        let mut sample = None;
        while let Some(front) = self.in_flight.front() {
            if front.seq > cumulative {
                break;
            }
            let acked = self.in_flight.pop_front()?;
            if acked.retransmits == 0 {
                sample = Some(now.saturating_duration_since(acked.sent_at));
            }
        }
        sample
    }

    /// Collect datagrams whose retransmission timeout has elapsed,
    /// bumping their retry counts.
    pub fn resend_due(&mut self, now: Instant, rto: Duration) -> Vec<PeerDatagram> {
        let mut due = Vec::new();
        for entry in &mut self.in_flight {
            if now.saturating_duration_since(entry.sent_at) >= rto {
                entry.retransmits += 1;
                entry.sent_at = now;
                due.push(PeerDatagram::Control {
                    seq: entry.seq,
                    payload: entry.payload.clone(),
                });
            }
        }
        due
    }

    /// Whether any payload has exhausted its retransmission budget.
    pub fn is_dead(&self) -> bool {
        self.in_flight
            .iter()
            .any(|e| e.retransmits >= MAX_RETRANSMITS)
    }

    /// Count of unacknowledged payloads.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

/// Receiver side of the reliable control sub-channel.
#[derive(Debug)]
pub struct ReliableInbound {
    next_expected: u64,
    pending: BTreeMap<u64, Vec<u8>>,
}

impl Default for ReliableInbound {
    fn default() -> Self {
        Self {
            next_expected: 1,
            pending: BTreeMap::new(),
        }
    }
}

impl ReliableInbound {
    /// Accept one sequenced payload. Returns the payloads now
    /// deliverable in order, which may be empty (a gap) or several (a
    /// gap just filled). Duplicates and stale sequences are dropped, as
    /// are sequences past the reorder window, which bounds how much a
    /// misbehaving peer can make this side buffer.
    pub fn accept(&mut self, seq: u64, payload: Vec<u8>) -> Vec<Vec<u8>> {
        if seq >= self.next_expected && seq - self.next_expected < PEER_REORDER_WINDOW {
            self.pending.entry(seq).or_insert(payload);
        }

        let mut deliverable = Vec::new();
        while let Some(payload) = self.pending.remove(&self.next_expected) {
            deliverable.push(payload);
            self.next_expected += 1;
        }
        deliverable
    }

    /// Highest sequence delivered in order, for the cumulative ack.
    pub fn cumulative_ack(&self) -> u64 {
        self.next_expected - 1
    }
}

/// Queues frames written before the channel pair has opened.
///
/// Both sub-channels open together once the first probe is answered;
/// frames queued before that moment flush in their original order.
#[derive(Debug, Default)]
pub struct PeerChannels {
    open: bool,
    queued: VecDeque<ChannelFrame>,
}

impl PeerChannels {
    /// Whether the channel pair is open for immediate sends.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Accept a frame: pass it through when open, queue it otherwise.
    pub fn submit(&mut self, frame: ChannelFrame) -> Option<ChannelFrame> {
        if self.open {
            Some(frame)
        } else {
            self.queued.push_back(frame);
            None
        }
    }

    /// Open both sub-channels, draining the pre-open queue in order.
    pub fn mark_open(&mut self) -> Vec<ChannelFrame> {
        self.open = true;
        self.queued.drain(..).collect()
    }
}
