//! `workspace/executeCommand` handlers for operators and tooling.

use serde_json::{json, Value};
use tracing::info;

use super::engine::{Engine, Publication};

pub const CLEAR_CACHE: &str = "rhema.clearCache";
pub const PERFORMANCE_REPORT: &str = "rhema.performanceReport";
pub const ERROR_RECORDS: &str = "rhema.errorRecords";
pub const CONFIGURATION: &str = "rhema.configuration";
pub const REINDEX: &str = "rhema.reindex";

pub const COMMANDS: &[&str] = &[
    CLEAR_CACHE,
    PERFORMANCE_REPORT,
    ERROR_RECORDS,
    CONFIGURATION,
    REINDEX,
];

#[derive(Debug)]
pub struct CommandOutput {
    pub result: Value,
    /// Diagnostics that changed as a side effect.
    pub publications: Vec<Publication>,
}

impl From<Value> for CommandOutput {
    fn from(result: Value) -> Self {
        CommandOutput {
            result,
            publications: Vec::new(),
        }
    }
}

pub fn performance_report(engine: &Engine) -> Value {
    let metrics = engine.telemetry().metrics.summary();
    json!({
        "operations": metrics,
        "samples": engine.telemetry().metrics.len(),
        "cache": engine.cache().stats(),
        "openDocuments": engine.open_documents().len(),
        "workspace": engine.index().get_workspace_stats(),
    })
}

/// Runs `command`. Unknown commands give `None`.
pub async fn execute(engine: &Engine, command: &str) -> Option<CommandOutput> {
    let output = match command {
        CLEAR_CACHE => {
            let entries = engine.cache().len();
            engine.clear_cache();
            json!({ "cleared": entries }).into()
        }
        PERFORMANCE_REPORT => performance_report(engine).into(),
        ERROR_RECORDS => json!(engine.telemetry().errors.records()).into(),
        CONFIGURATION => json!({
            "settings": *engine.settings(),
            "capabilities": engine.capabilities(),
            "roots": engine.index().roots(),
            "state": engine.state(),
        })
        .into(),
        REINDEX => match engine.reindex().await {
            Ok((stats, publications)) => CommandOutput {
                result: json!(stats),
                publications,
            },
            Err(err) => {
                engine
                    .telemetry()
                    .errors
                    .record("workspace reindex failed", &err, Some(REINDEX));
                json!({ "error": err.to_string() }).into()
            }
        },
        _ => return None,
    };
    info!(command, "command executed");
    Some(output)
}
