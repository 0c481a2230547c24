//! In-process counters for authorization requests.
//!
//! Counters are lock-free atomics so a shared [`Cedarling`](crate::Cedarling) can record
//! from many threads. A [`TelemetryMetrics`] snapshot is cheap to take and serializable.

use crate::policy::Decision;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for authorization requests.
#[derive(Debug)]
pub struct Telemetry {
    /// Decisions by outcome
    allow: AtomicU64,
    deny: AtomicU64,
    /// Requests rejected before evaluation
    request_errors: AtomicU64,
    /// Conditions that failed to evaluate
    condition_errors: AtomicU64,
    /// Total decision time in microseconds
    total_decision_time_us: AtomicU64,
    /// When counting started
    started: Instant,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            allow: AtomicU64::new(0),
            deny: AtomicU64::new(0),
            request_errors: AtomicU64::new(0),
            condition_errors: AtomicU64::new(0),
            total_decision_time_us: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl Telemetry {
    /// Create a telemetry instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one decision.
    pub fn record_decision(&self, decision: Decision, condition_errors: usize, duration: Duration) {
        match decision {
            Decision::Allow => self.allow.fetch_add(1, Ordering::Relaxed),
            Decision::Deny => self.deny.fetch_add(1, Ordering::Relaxed),
        };

        if condition_errors > 0 {
            self.condition_errors
                .fetch_add(condition_errors as u64, Ordering::Relaxed);
        }

        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.total_decision_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Record a request that was rejected with an error.
    pub fn record_request_error(&self) {
        self.request_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics.
    pub fn metrics(&self) -> TelemetryMetrics {
        let allow_count = self.allow.load(Ordering::Relaxed);
        let deny_count = self.deny.load(Ordering::Relaxed);
        let total_decisions = allow_count + deny_count;

        let allow_rate = if total_decisions > 0 {
            allow_count as f64 / total_decisions as f64
        } else {
            0.0
        };

        let total_time_us = self.total_decision_time_us.load(Ordering::Relaxed);
        let avg_decision_time_ms = if total_decisions > 0 {
            (total_time_us as f64 / total_decisions as f64) / 1000.0
        } else {
            0.0
        };

        let request_errors = self.request_errors.load(Ordering::Relaxed);

        TelemetryMetrics {
            total_requests: total_decisions + request_errors,
            allow_count,
            deny_count,
            request_errors,
            condition_errors: self.condition_errors.load(Ordering::Relaxed),
            allow_rate,
            avg_decision_time_ms,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Snapshot of the counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMetrics {
    /// Requests received, including rejected ones
    pub total_requests: u64,
    /// ALLOW decisions
    pub allow_count: u64,
    /// DENY decisions
    pub deny_count: u64,
    /// Requests rejected before evaluation
    pub request_errors: u64,
    /// Conditions that failed to evaluate
    pub condition_errors: u64,
    /// Fraction of decisions that were ALLOW, 0.0 to 1.0
    pub allow_rate: f64,
    /// Average decision time in milliseconds
    pub avg_decision_time_ms: f64,
    /// Seconds since the engine was built
    pub uptime_secs: u64,
}
