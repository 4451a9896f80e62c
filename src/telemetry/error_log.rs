use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;

/// A failure that was recovered from but should not go unnoticed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub cause: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of [`ErrorRecord`]s, kept for the lifetime of the process.
#[derive(Debug, Default)]
pub struct ErrorLog {
    records: Mutex<Vec<ErrorRecord>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, message: impl Into<String>, cause: impl ToString, context: Option<&str>) {
        let record = ErrorRecord {
            message: message.into(),
            cause: cause.to_string(),
            context: context.map(str::to_string),
            timestamp: Utc::now(),
        };
        error!(
            context = record.context.as_deref().unwrap_or("-"),
            cause = %record.cause,
            "{}",
            record.message
        );
        self.records.lock().push(record);
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_keep_insertion_order() {
        let log = ErrorLog::new();
        log.record("hover failed", "boom", Some("textDocument/hover"));
        log.record("index skipped file", "permission denied", None);

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].context.as_deref(), Some("textDocument/hover"));
        assert_eq!(records[1].cause, "permission denied");
        assert!(records[0].timestamp <= records[1].timestamp);
    }
}
