//! Request counters for the driver's `status` command.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Atomic metrics for driver activity.
pub struct Metrics {
    /// Requests answered, successfully or not
    pub requests_total: AtomicU64,
    /// Requests answered with an error
    pub requests_failed: AtomicU64,
    /// Sum of all request latencies in microseconds
    pub requests_latency_us: AtomicU64,
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            requests_latency_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record an answered request.
    pub fn record_request(&self, latency: Duration, failed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.requests_latency_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Mean latency over every recorded request.
    pub fn avg_latency(&self) -> Duration {
        let total = self.requests();
        let latency_us = self.requests_latency_us.load(Ordering::Relaxed);
        if total == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(latency_us / total)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let metrics = Metrics::new();
        assert_eq!(metrics.avg_latency(), Duration::ZERO);

        metrics.record_request(Duration::from_micros(100), false);
        metrics.record_request(Duration::from_micros(300), true);
        assert_eq!(metrics.requests(), 2);
        assert_eq!(metrics.failures(), 1);
        assert_eq!(metrics.avg_latency(), Duration::from_micros(200));
    }
}
