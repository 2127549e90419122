//! Rolling per-session latency metrics
//!
//! Latency samples live in a fixed-size window so mean and p95 track
//! recent behavior rather than the whole call. Errors and cache outcomes
//! are lifetime counters.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Point-in-time view of a session's metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Samples currently in the window
    pub samples: usize,
    /// Mean end-to-end latency over the window, milliseconds
    pub mean_ms: u64,
    /// p95 end-to-end latency over the window, milliseconds
    pub p95_ms: u64,
    /// Lifetime pipeline errors
    pub errors: u64,
    /// Lifetime cache lookups
    pub cache_lookups: u64,
    /// Lifetime cache hits
    pub cache_hits: u64,
    /// Hit ratio over lifetime lookups
    pub cache_hit_ratio: f64,
}

/// Fixed-window latency accumulator
#[derive(Debug)]
pub struct RollingMetrics {
    window: usize,
    latencies_ms: VecDeque<u64>,
    errors: u64,
    cache_lookups: u64,
    cache_hits: u64,
}

impl RollingMetrics {
    /// Create an accumulator with the given window size
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            latencies_ms: VecDeque::with_capacity(window.max(1)),
            errors: 0,
            cache_lookups: 0,
            cache_hits: 0,
        }
    }

    /// Record one end-to-end latency sample, evicting the oldest once the
    /// window is full
    pub fn record_latency(&mut self, latency: Duration) {
        if self.latencies_ms.len() == self.window {
            self.latencies_ms.pop_front();
        }
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latencies_ms.push_back(ms);
    }

    /// Record one pipeline error
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Record one cache lookup and its outcome
    pub fn record_cache_lookup(&mut self, hit: bool) {
        self.cache_lookups += 1;
        if hit {
            self.cache_hits += 1;
        }
    }

    /// Mean latency over the window
    #[must_use]
    pub fn mean(&self) -> Duration {
        if self.latencies_ms.is_empty() {
            return Duration::ZERO;
        }
        let sum: u64 = self.latencies_ms.iter().sum();
        Duration::from_millis(sum / self.latencies_ms.len() as u64)
    }

    /// p95 latency over the window.
    ///
    /// Uses the nearest-rank method on a sorted copy of the window.
    #[must_use]
    pub fn p95(&self) -> Duration {
        if self.latencies_ms.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<u64> = self.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();
        let rank = (sorted.len() as f64 * 0.95).ceil() as usize;
        Duration::from_millis(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mean_ms = u64::try_from(self.mean().as_millis()).unwrap_or(u64::MAX);
        let p95_ms = u64::try_from(self.p95().as_millis()).unwrap_or(u64::MAX);
        let cache_hit_ratio = if self.cache_lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.cache_lookups as f64
        };

        MetricsSnapshot {
            samples: self.latencies_ms.len(),
            mean_ms,
            p95_ms,
            errors: self.errors,
            cache_lookups: self.cache_lookups,
            cache_hits: self.cache_hits,
            cache_hit_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_zero() {
        let metrics = RollingMetrics::new(100);
        assert_eq!(metrics.mean(), Duration::ZERO);
        assert_eq!(metrics.p95(), Duration::ZERO);
        assert_eq!(metrics.snapshot().samples, 0);
    }

    #[test]
    fn mean_and_p95_over_known_samples() {
        let mut metrics = RollingMetrics::new(100);
        for ms in 1..=100u64 {
            metrics.record_latency(Duration::from_millis(ms));
        }
        assert_eq!(metrics.mean(), Duration::from_millis(50));
        // Nearest-rank p95 of 1..=100 is the 95th value.
        assert_eq!(metrics.p95(), Duration::from_millis(95));
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let mut metrics = RollingMetrics::new(3);
        for ms in [10u64, 20, 30, 40] {
            metrics.record_latency(Duration::from_millis(ms));
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples, 3);
        assert_eq!(metrics.mean(), Duration::from_millis(30));
    }

    #[test]
    fn cache_ratio_tracks_lookups() {
        let mut metrics = RollingMetrics::new(10);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_lookups, 4);
        assert_eq!(snapshot.cache_hits, 3);
        assert!((snapshot.cache_hit_ratio - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn single_sample_is_its_own_p95() {
        let mut metrics = RollingMetrics::new(10);
        metrics.record_latency(Duration::from_millis(120));
        assert_eq!(metrics.p95(), Duration::from_millis(120));
    }
}
