//! RTT estimation.
//!
//! One estimator serves two consumers: the session heartbeat, which
//! samples round-trip latency from ping/pong nonce echoes, and the peer
//! control sub-channel, which derives its retransmission timeout from
//! the smoothed estimate (RFC 6298).

use std::time::Duration;

use crate::core::constants::{INITIAL_RTO, MAX_RTO, MIN_RTO};

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;
const K: f64 = 4.0;

/// Smoothed round-trip estimator with an adaptive retransmission timeout.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    smoothed_ms: f64,
    variance_ms: f64,
    rto: Duration,
    samples: u64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    /// Create an estimator with no samples and the initial RTO.
    pub fn new() -> Self {
        Self {
            smoothed_ms: 0.0,
            variance_ms: 0.0,
            rto: INITIAL_RTO,
            samples: 0,
        }
    }

    /// Fold in one round-trip sample.
    pub fn record(&mut self, sample: Duration) {
        let sample_ms = sample.as_secs_f64() * 1000.0;

        if self.samples == 0 {
            self.smoothed_ms = sample_ms;
            self.variance_ms = sample_ms / 2.0;
        } else {
            self.variance_ms =
                (1.0 - BETA) * self.variance_ms + BETA * (self.smoothed_ms - sample_ms).abs();
            self.smoothed_ms = (1.0 - ALPHA) * self.smoothed_ms + ALPHA * sample_ms;
        }
        self.samples += 1;

        let rto_ms = (self.smoothed_ms + K * self.variance_ms).clamp(
            MIN_RTO.as_millis() as f64,
            MAX_RTO.as_millis() as f64,
        );
        self.rto = Duration::from_millis(rto_ms as u64);
    }

    /// Smoothed latency, once at least one sample has arrived.
    pub fn latency(&self) -> Option<Duration> {
        (self.samples > 0).then(|| Duration::from_secs_f64(self.smoothed_ms / 1000.0))
    }

    /// Number of samples folded in so far.
    pub fn sample_count(&self) -> u64 {
        self.samples
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Double the RTO after a retransmission, capped at the maximum.
    pub fn backoff(&mut self) -> Duration {
        self.rto = self.rto.saturating_mul(2).min(MAX_RTO);
        self.rto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_samples_means_no_latency() {
        let rtt = RttEstimator::new();
        assert_eq!(rtt.latency(), None);
        assert_eq!(rtt.rto(), INITIAL_RTO);
    }

    #[test]
    fn test_first_sample_sets_estimate() {
        let mut rtt = RttEstimator::new();
        rtt.record(Duration::from_millis(80));

        let latency = rtt.latency().unwrap();
        assert_eq!(latency, Duration::from_millis(80));
        assert_eq!(rtt.sample_count(), 1);
    }

    #[test]
    fn test_estimate_moves_toward_new_samples() {
        let mut rtt = RttEstimator::new();
        rtt.record(Duration::from_millis(100));
        let first = rtt.latency().unwrap();

        rtt.record(Duration::from_millis(200));
        let second = rtt.latency().unwrap();

        assert!(second > first);
        assert!(second < Duration::from_millis(200));
    }

    #[test]
    fn test_rto_stays_within_bounds() {
        let mut rtt = RttEstimator::new();
        rtt.record(Duration::from_micros(10));
        assert!(rtt.rto() >= MIN_RTO);

        for _ in 0..32 {
            rtt.backoff();
        }
        assert_eq!(rtt.rto(), MAX_RTO);
    }
}
