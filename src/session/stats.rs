//! Session statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::transport::LinkCounters;

/// Point-in-time statistics snapshot for one session.
///
/// Byte totals and the reconnect count accumulate across reconnects for
/// the lifetime of the session; they are never reset when a new
/// connection replaces a dropped one.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    /// Total bytes handed to transports.
    pub bytes_sent: u64,
    /// Total bytes received from transports.
    pub bytes_received: u64,
    /// Times an established connection dropped.
    pub reconnect_count: u32,
    /// Time since the session was created.
    pub uptime: Duration,
    /// Whether the session currently holds a live connection.
    pub connected: bool,
    /// Smoothed heartbeat round-trip latency, once measured.
    pub latency: Option<Duration>,
}

/// Writable side of the statistics, shared between the session handle
/// and its driver task.
#[derive(Debug)]
pub(super) struct SharedStats {
    counters: Arc<LinkCounters>,
    reconnects: AtomicU32,
    connected: AtomicBool,
    started: Instant,
    latency_us: AtomicU64,
}

impl SharedStats {
    pub fn new(counters: Arc<LinkCounters>) -> Self {
        Self {
            counters,
            reconnects: AtomicU32::new(0),
            connected: AtomicBool::new(true),
            started: Instant::now(),
            latency_us: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        let latency_us = self.latency_us.load(Ordering::Relaxed);
        SessionStats {
            bytes_sent: self.counters.bytes_sent(),
            bytes_received: self.counters.bytes_received(),
            reconnect_count: self.reconnects.load(Ordering::Relaxed),
            uptime: self.started.elapsed(),
            connected: self.connected.load(Ordering::Relaxed),
            latency: (latency_us > 0).then(|| Duration::from_micros(latency_us)),
        }
    }

    /// Record an unplanned connection drop.
    pub fn on_disconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
    }

    /// Record an intentional close. Does not count as a reconnect.
    pub fn on_close(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let counters = Arc::new(LinkCounters::default());
        let stats = SharedStats::new(counters.clone());

        counters.record_sent(100);
        counters.record_received(250);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bytes_sent, 100);
        assert_eq!(snapshot.bytes_received, 250);
        assert_eq!(snapshot.reconnect_count, 0);
        assert!(snapshot.connected);
        assert_eq!(snapshot.latency, None);
    }

    #[test]
    fn test_disconnect_bumps_reconnect_count() {
        let stats = SharedStats::new(Arc::new(LinkCounters::default()));
        stats.on_disconnect();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.reconnect_count, 1);
        assert!(!snapshot.connected);
    }

    #[test]
    fn test_intentional_close_does_not_count() {
        let stats = SharedStats::new(Arc::new(LinkCounters::default()));
        stats.on_close();
        assert_eq!(stats.snapshot().reconnect_count, 0);
    }

    #[test]
    fn test_latency_appears_after_sample() {
        let stats = SharedStats::new(Arc::new(LinkCounters::default()));
        stats.set_latency(Duration::from_millis(35));
        assert_eq!(stats.snapshot().latency, Some(Duration::from_millis(35)));
    }
}
