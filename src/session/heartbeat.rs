//! Heartbeat bookkeeping.

use std::time::{Duration, Instant};

use crate::transport::RttEstimator;

/// Tracks outstanding pings and folds pong round-trips into a smoothed
/// latency estimate.
///
/// One ping is outstanding at a time. A new ping before the previous
/// pong simply replaces it; the missed sample is the only penalty.
#[derive(Debug, Default)]
pub(super) struct Heartbeat {
    next_nonce: u64,
    pending: Option<(u64, Instant)>,
    rtt: RttEstimator,
}

impl Heartbeat {
    /// Issue the nonce for the next ping.
    pub fn ping(&mut self, now: Instant) -> u64 {
        self.next_nonce += 1;
        if self.pending.is_some() {
            tracing::trace!("heartbeat pong missed");
        }
        self.pending = Some((self.next_nonce, now));
        self.next_nonce
    }

    /// Match a pong to the outstanding ping. Returns the round-trip
    /// sample when the nonce matches.
    pub fn on_pong(&mut self, nonce: u64, now: Instant) -> Option<Duration> {
        let (expected, sent_at) = self.pending?;
        if nonce != expected {
            return None;
        }
        self.pending = None;
        let sample = now.saturating_duration_since(sent_at);
        self.rtt.record(sample);
        Some(sample)
    }

    /// Smoothed round-trip latency, once at least one pong has matched.
    pub fn latency(&self) -> Option<Duration> {
        self.rtt.latency()
    }
}
