//! Error records and performance metrics.
//!
//! Both recorders are internally synchronized so they can be shared between
//! the request loop and the blocking pool.

mod error_log;
mod metrics;

use std::time::Duration;

pub use error_log::{ErrorLog, ErrorRecord};
pub use metrics::{OperationStats, PerformanceMetric, PerformanceMonitor, DEFAULT_CAPACITY};

use crate::config::TelemetrySettings;

#[derive(Debug, Default)]
pub struct Telemetry {
    pub errors: ErrorLog,
    pub metrics: PerformanceMonitor,
}

impl Telemetry {
    pub fn new(settings: &TelemetrySettings) -> Self {
        Self {
            errors: ErrorLog::new(),
            metrics: PerformanceMonitor::new(
                settings.max_metrics,
                Duration::from_millis(settings.slow_request_ms),
            ),
        }
    }

    pub fn apply(&self, settings: &TelemetrySettings) {
        self.metrics.reconfigure(
            settings.max_metrics,
            Duration::from_millis(settings.slow_request_ms),
        );
    }
}
