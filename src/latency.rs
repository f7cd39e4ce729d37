//! Validation latency tracking
//!
//! Keeps a bounded window of recent validation durations and reports the
//! percentiles used as the resilience budget (P95 / P99).

use serde::Serialize;
use statrs::statistics::{Data, OrderStatistics};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn within_budget(&self, p95_budget_ms: u64, p99_budget_ms: u64) -> bool {
        self.p95_ms <= p95_budget_ms as f64 && self.p99_ms <= p99_budget_ms as f64
    }
}

/// Thread-safe rolling window of durations in milliseconds
#[derive(Debug)]
pub struct LatencyTracker {
    window: usize,
    samples: Mutex<VecDeque<f64>>,
}

impl LatencyTracker {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: Mutex::new(VecDeque::with_capacity(window)),
        }
    }

    pub fn record(&self, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        // A poisoned lock only means another recorder panicked mid-push
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.len() == self.window {
            samples.pop_front();
        }
        samples.push_back(ms);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> LatencySummary {
        let values: Vec<f64> = {
            let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
            samples.iter().copied().collect()
        };

        if values.is_empty() {
            return LatencySummary::default();
        }

        let count = values.len();
        let max_ms = values.iter().copied().fold(f64::MIN, f64::max);
        let mut data = Data::new(values);

        LatencySummary {
            count,
            p50_ms: data.percentile(50),
            p95_ms: data.percentile(95),
            p99_ms: data.percentile(99),
            max_ms,
        }
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}
