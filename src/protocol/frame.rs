//! The channel frame envelope and its payload types.

use serde::{Deserialize, Serialize};

use crate::core::FrameError;
use crate::core::constants::MAX_FRAME_SIZE;

/// The two multiplexed channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Reliable, ordered. Input and control messages.
    Control,
    /// Best-effort, unordered. Snapshots and deltas.
    State,
}

/// Frame kind discriminator.
///
/// Redundant with the payload's own `type` tag but cheap to inspect
/// without touching the payload; unknown kinds decode without failing
/// the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    /// Heartbeat request.
    Ping,
    /// Heartbeat reply.
    Pong,
    /// Player input.
    Input,
    /// World-state event.
    Event,
    /// Anything this client version does not know.
    #[serde(other)]
    Unknown,
}

/// State event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    /// Full encoding of all tracked entity state at a tick.
    Snapshot,
    /// Only the entities/fields changed since the previous tick.
    Delta,
    /// Snapshot with fixed-point encoded numeric fields.
    QuantizedSnapshot,
    /// Delta with fixed-point encoded numeric fields.
    QuantizedDelta,
}

/// Typed frame payload, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Heartbeat request. The nonce is echoed back in the pong.
    Ping {
        /// Sender-chosen nonce for RTT matching.
        nonce: u64,
    },
    /// Heartbeat reply carrying the ping's nonce.
    Pong {
        /// Echoed nonce.
        nonce: u64,
    },
    /// Player input, opaque to this layer.
    Input {
        /// Simulation tick the input applies to.
        #[serde(default)]
        tick: u64,
        /// Application-defined input data.
        data: serde_json::Value,
    },
    /// World-state event.
    Event {
        /// Event discriminator.
        name: EventName,
        /// Simulation tick.
        tick: u64,
        /// Event payload; quantized payloads decode via [`crate::codec`].
        payload: serde_json::Value,
    },
    /// Forward compatibility: payload types this client version does not
    /// know pass through undecoded.
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl Payload {
    /// The kind discriminator matching this payload.
    pub fn kind(&self) -> FrameKind {
        match self {
            Payload::Ping { .. } => FrameKind::Ping,
            Payload::Pong { .. } => FrameKind::Pong,
            Payload::Input { .. } => FrameKind::Input,
            Payload::Event { .. } => FrameKind::Event,
            Payload::Other(_) => FrameKind::Unknown,
        }
    }
}

/// The wire envelope shared by every transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelFrame {
    /// Which multiplexed channel this frame belongs to.
    pub channel: Channel,
    /// Per-channel sender-assigned counter. Not guaranteed contiguous at
    /// the receiver on the state channel.
    pub sequence: u64,
    /// Sender wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
    /// Kind discriminator.
    pub kind: FrameKind,
    /// Typed payload.
    pub message: Payload,
}

impl ChannelFrame {
    /// Build a frame, deriving `kind` from the payload.
    pub fn new(channel: Channel, sequence: u64, timestamp_ms: u64, message: Payload) -> Self {
        Self {
            channel,
            sequence,
            timestamp_ms,
            kind: message.kind(),
            message,
        }
    }

    /// Whether this frame belongs on the reliable control path.
    ///
    /// Control and input traffic must arrive in order; everything else
    /// defaults to the best-effort state path.
    pub fn is_control_traffic(&self) -> bool {
        matches!(
            self.kind,
            FrameKind::Ping | FrameKind::Pong | FrameKind::Input
        ) || self.channel == Channel::Control
    }

    /// Encode to the JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Decode from the JSON wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}
