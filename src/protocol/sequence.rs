//! Per-channel outbound sequencing.

use std::time::{SystemTime, UNIX_EPOCH};

use super::frame::{Channel, ChannelFrame, Payload};

/// Milliseconds since the Unix epoch, for frame timestamps.
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Assigns sender-side sequence numbers, one counter per channel.
///
/// Counters start at 1 and only ever increase. The receiver must not
/// assume state-channel sequences arrive contiguously or monotonically.
#[derive(Debug, Default, Clone)]
pub struct ChannelSequencer {
    control: u64,
    state: u64,
}

impl ChannelSequencer {
    /// Create a sequencer with both counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next sequence number for a channel.
    pub fn next(&mut self, channel: Channel) -> u64 {
        let counter = match channel {
            Channel::Control => &mut self.control,
            Channel::State => &mut self.state,
        };
        *counter += 1;
        *counter
    }

    /// Build a fully stamped frame for a channel.
    pub fn frame(&mut self, channel: Channel, message: Payload) -> ChannelFrame {
        let sequence = self.next(channel);
        ChannelFrame::new(channel, sequence, unix_timestamp_ms(), message)
    }

    /// Highest sequence assigned so far on a channel.
    pub fn last(&self, channel: Channel) -> u64 {
        match channel {
            Channel::Control => self.control,
            Channel::State => self.state,
        }
    }
}
