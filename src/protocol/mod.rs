//! Channel message protocol.
//!
//! The shared wire envelope carried by every transport: a JSON frame
//! tagged with its channel, a per-channel sender-assigned sequence
//! number, a millisecond timestamp, and a typed payload.
//!
//! Control-channel frames are delivered reliably and in order; state
//! frames are best-effort, and their sequence numbers are not guaranteed
//! contiguous at the receiver.

mod frame;
mod sequence;

pub use frame::{Channel, ChannelFrame, EventName, FrameKind, Payload};
pub use sequence::{ChannelSequencer, unix_timestamp_ms};
