use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetric {
    pub operation: String,
    #[serde(serialize_with = "as_millis")]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

fn as_millis<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationStats {
    pub count: usize,
    pub mean_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

/// Bounded FIFO window of the most recent metrics.
#[derive(Debug)]
pub struct PerformanceMonitor {
    window: Mutex<VecDeque<PerformanceMetric>>,
    capacity: Mutex<usize>,
    slow_threshold: Mutex<Duration>,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_millis(200))
    }
}

impl PerformanceMonitor {
    pub fn new(capacity: usize, slow_threshold: Duration) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity: Mutex::new(capacity.max(1)),
            slow_threshold: Mutex::new(slow_threshold),
        }
    }

    pub fn reconfigure(&self, capacity: usize, slow_threshold: Duration) {
        let capacity = capacity.max(1);
        *self.capacity.lock() = capacity;
        *self.slow_threshold.lock() = slow_threshold;
        let mut window = self.window.lock();
        while window.len() > capacity {
            window.pop_front();
        }
    }

    pub fn record(
        &self,
        operation: &str,
        duration: Duration,
        metadata: Option<serde_json::Value>,
    ) {
        if duration > *self.slow_threshold.lock() {
            warn!(operation, elapsed_ms = duration.as_millis() as u64, "slow request");
        }
        let capacity = *self.capacity.lock();
        let mut window = self.window.lock();
        while window.len() >= capacity {
            window.pop_front();
        }
        window.push_back(PerformanceMetric {
            operation: operation.to_string(),
            duration,
            timestamp: Utc::now(),
            metadata,
        });
    }

    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        self.window.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.window.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Per-operation summary of the current window.
    pub fn summary(&self) -> BTreeMap<String, OperationStats> {
        let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for metric in self.window.lock().iter() {
            grouped
                .entry(metric.operation.clone())
                .or_default()
                .push(metric.duration.as_secs_f64() * 1000.0);
        }

        grouped
            .into_iter()
            .map(|(operation, mut samples)| {
                samples.sort_by(|a, b| a.total_cmp(b));
                let count = samples.len();
                let mean_ms = samples.iter().sum::<f64>() / count as f64;
                // nearest-rank percentile
                let rank = ((count as f64) * 0.95).ceil() as usize;
                let p95_ms = samples[rank.clamp(1, count) - 1];
                let max_ms = samples[count - 1];
                (
                    operation,
                    OperationStats {
                        count,
                        mean_ms,
                        p95_ms,
                        max_ms,
                    },
                )
            })
            .collect()
    }
}
