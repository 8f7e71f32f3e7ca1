//! Save metrics.
//!
//! Counters for the requests a save controller dispatches and how they end.
//! Each controller owns its metrics; the session hands out a shared handle.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct SaveMetrics {
    /// Save requests dispatched
    requests: AtomicUsize,

    /// Requests that completed successfully
    successes: AtomicUsize,

    /// Requests that failed (aborted requests excluded)
    failures: AtomicUsize,

    /// Requests superseded by a newer one
    aborted: AtomicUsize,

    /// Automatic retries scheduled after a failure
    retries_scheduled: AtomicUsize,
}

impl SaveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn aborted(&self) -> usize {
        self.aborted.load(Ordering::Relaxed)
    }

    pub fn retries_scheduled(&self) -> usize {
        self.retries_scheduled.load(Ordering::Relaxed)
    }

    /// Generate a metrics report.
    pub fn report(&self) -> SaveMetricsReport {
        let successes = self.successes();
        let failures = self.failures();
        let completed = successes + failures;
        let success_rate = if completed > 0 {
            (successes as f64 / completed as f64) * 100.0
        } else {
            0.0
        };

        SaveMetricsReport {
            requests: self.requests(),
            successes,
            failures,
            aborted: self.aborted(),
            retries_scheduled: self.retries_scheduled(),
            success_rate,
        }
    }
}

/// Snapshot of the save counters.
#[derive(Debug, Clone, Serialize)]
pub struct SaveMetricsReport {
    pub requests: usize,
    pub successes: usize,
    pub failures: usize,
    pub aborted: usize,
    pub retries_scheduled: usize,

    /// Share of completed requests that succeeded, as a percentage (0-100)
    pub success_rate: f64,
}

impl SaveMetricsReport {
    /// Render the report as a single log line.
    pub fn to_log_string(&self) -> String {
        format!(
            "Save metrics: {} requests, {} succeeded, {} failed, {} aborted, {} retries scheduled ({:.1}% success)",
            self.requests,
            self.successes,
            self.failures,
            self.aborted,
            self.retries_scheduled,
            self.success_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let report = SaveMetrics::new().report();
        assert_eq!(report.requests, 0);
        assert_eq!(report.success_rate, 0.0);
    }

    #[test]
    fn test_success_rate_ignores_aborted() {
        let metrics = SaveMetrics::new();
        for _ in 0..4 {
            metrics.record_request();
        }
        metrics.record_aborted();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        metrics.record_retry_scheduled();

        let report = metrics.report();
        assert_eq!(report.requests, 4);
        assert_eq!(report.aborted, 1);
        assert_eq!(report.retries_scheduled, 1);
        assert!((report.success_rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_report_serializes() {
        let metrics = SaveMetrics::new();
        metrics.record_request();
        let json = serde_json::to_value(metrics.report()).unwrap();
        assert_eq!(json["requests"], 1);
    }

    #[test]
    fn test_log_string() {
        let metrics = SaveMetrics::new();
        metrics.record_request();
        metrics.record_success();
        let line = metrics.report().to_log_string();
        assert!(line.contains("1 requests"));
        assert!(line.contains("100.0% success"));
    }
}
