//! Inference latency and error statistics.
//!
//! Latencies are kept in a fixed-capacity sliding window with a running
//! sum, so the average updates in O(1). p95 is recomputed from a sorted
//! copy of the window on every insert once enough samples exist.
//! Min/max and the counters cover every call since the last reset.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of latency samples kept in the window.
pub const STATS_WINDOW_SIZE: usize = 200;

/// Samples required before p95 is reported.
const MIN_SAMPLES_FOR_P95: usize = 5;

/// Most recent failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastError {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time copy of the statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Successful inference calls
    pub total_calls: u64,
    pub total_errors: u64,
    /// Characters embedded across successful calls
    pub total_chars: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    /// Samples currently in the window
    pub window_len: usize,
    pub last_error: Option<LastError>,
}

#[derive(Debug)]
pub struct StatsWindow {
    capacity: usize,
    samples: VecDeque<f64>,
    sum: f64,
    avg: f64,
    p95: f64,
    min: Option<f64>,
    max: Option<f64>,
    total_calls: u64,
    total_errors: u64,
    total_chars: u64,
    last_error: Option<LastError>,
}

impl Default for StatsWindow {
    fn default() -> Self {
        Self::with_capacity(STATS_WINDOW_SIZE)
    }
}

impl StatsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            sum: 0.0,
            avg: 0.0,
            p95: 0.0,
            min: None,
            max: None,
            total_calls: 0,
            total_errors: 0,
            total_chars: 0,
            last_error: None,
        }
    }

    /// Record a successful call.
    pub fn record_success(&mut self, chars: usize, latency_ms: f64) {
        self.total_calls += 1;
        self.total_chars += chars as u64;
        self.record_latency(latency_ms);
    }

    /// Add one latency sample, evicting the oldest when full.
    pub fn record_latency(&mut self, latency_ms: f64) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
        self.samples.push_back(latency_ms);
        self.sum += latency_ms;
        self.avg = self.sum / self.samples.len() as f64;

        self.min = Some(self.min.map_or(latency_ms, |m| m.min(latency_ms)));
        self.max = Some(self.max.map_or(latency_ms, |m| m.max(latency_ms)));

        if self.samples.len() >= MIN_SAMPLES_FOR_P95 {
            let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let idx = ((0.95 * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
            self.p95 = sorted[idx];
        }
    }

    /// Record a failed call: bumps the error counter and the last error.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.total_errors += 1;
        self.set_last_error(message);
    }

    /// Record the last error without counting a failed call (load failures).
    pub fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(LastError {
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn reset(&mut self) {
        *self = Self::with_capacity(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_calls: self.total_calls,
            total_errors: self.total_errors,
            total_chars: self.total_chars,
            avg_latency_ms: self.avg,
            p95_latency_ms: self.p95,
            min_latency_ms: self.min.unwrap_or(0.0),
            max_latency_ms: self.max.unwrap_or(0.0),
            window_len: self.samples.len(),
            last_error: self.last_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_average_below_capacity() {
        let mut stats = StatsWindow::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            stats.record_latency(v);
        }
        let snap = stats.snapshot();
        assert!(approx(snap.avg_latency_ms, 30.0));
        assert!(approx(snap.min_latency_ms, 10.0));
        assert!(approx(snap.max_latency_ms, 50.0));
        // floor(0.95 * 5) = 4 -> largest sample
        assert!(approx(snap.p95_latency_ms, 50.0));
        assert_eq!(snap.window_len, 5);
    }

    #[test]
    fn test_p95_needs_five_samples() {
        let mut stats = StatsWindow::new();
        for v in [10.0, 20.0, 30.0, 40.0] {
            stats.record_latency(v);
        }
        assert_eq!(stats.snapshot().p95_latency_ms, 0.0);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut stats = StatsWindow::new();
        for _ in 0..205 {
            stats.record_latency(1.0);
        }
        stats.record_latency(1000.0);

        let snap = stats.snapshot();
        assert_eq!(snap.window_len, STATS_WINDOW_SIZE);
        // 199 ones + one 1000 in the window
        assert!(approx(snap.avg_latency_ms, (199.0 + 1000.0) / 200.0));
        // floor(0.95 * 200) = 190 -> still a 1.0 sample
        assert!(approx(snap.p95_latency_ms, 1.0));
        assert!(approx(snap.min_latency_ms, 1.0));
        assert!(approx(snap.max_latency_ms, 1000.0));
    }

    #[test]
    fn test_max_survives_eviction() {
        let mut stats = StatsWindow::with_capacity(5);
        stats.record_latency(500.0);
        for _ in 0..10 {
            stats.record_latency(2.0);
        }
        let snap = stats.snapshot();
        assert!(approx(snap.avg_latency_ms, 2.0));
        assert!(approx(snap.max_latency_ms, 500.0));
    }

    #[test]
    fn test_success_and_error_counters() {
        let mut stats = StatsWindow::new();
        stats.record_success(11, 4.0);
        stats.record_success(5, 6.0);
        stats.record_error("backend exploded");

        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 2);
        assert_eq!(snap.total_chars, 16);
        assert_eq!(snap.total_errors, 1);
        assert_eq!(snap.last_error.unwrap().message, "backend exploded");
    }

    #[test]
    fn test_set_last_error_does_not_count() {
        let mut stats = StatsWindow::new();
        stats.set_last_error("load timeout");
        let snap = stats.snapshot();
        assert_eq!(snap.total_errors, 0);
        assert!(snap.last_error.is_some());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut stats = StatsWindow::new();
        stats.record_success(3, 9.0);
        stats.record_error("x");
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 0);
        assert_eq!(snap.total_errors, 0);
        assert_eq!(snap.window_len, 0);
        assert_eq!(snap.min_latency_ms, 0.0);
        assert!(snap.last_error.is_none());
        assert!(stats.is_empty());
    }
}
