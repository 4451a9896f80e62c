use std::path::Path;

use anyhow::anyhow;
use config::{Config, File};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tower_lsp::lsp_types::ClientCapabilities;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub semantic_tokens: bool,
    pub case_matching: Case,
    pub diagnostics: DiagnosticsSettings,
    pub index: IndexSettings,
    pub telemetry: TelemetrySettings,
    pub providers: ProviderSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub enabled: bool,
    /// Warn about dependencies that no indexed scope provides
    pub unresolved_dependencies: bool,
    pub max_per_file: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IndexSettings {
    pub enabled: bool,
    /// Files processed between yields during a rebuild
    pub batch_size: usize,
    /// Directory names skipped while scanning
    pub exclude: Vec<String>,
    /// Files larger than this (bytes) are skipped
    pub max_file_size: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TelemetrySettings {
    pub max_metrics: usize,
    pub slow_request_ms: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    pub hover: bool,
    pub completion: bool,
    /// Watchdog for a single provider call
    pub timeout_ms: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum Case {
    Ignore,
    Smart,
    Respect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Integer { min: i64, max: i64 },
    Choice(&'static [&'static str]),
    StringList,
    Section,
}

impl OptionKind {
    fn expected(&self) -> &'static str {
        match self {
            OptionKind::Bool => "a boolean",
            OptionKind::Integer { .. } => "an integer",
            OptionKind::Choice(_) => "a string",
            OptionKind::StringList => "a list of strings",
            OptionKind::Section => "a table",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    pub path: &'static str,
    pub kind: OptionKind,
    pub doc: &'static str,
}

/// Every option the server understands, keyed by dotted path.
pub static OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        path: "semantic_tokens",
        kind: OptionKind::Bool,
        doc: "Provide semantic highlighting",
    },
    OptionSpec {
        path: "case_matching",
        kind: OptionKind::Choice(&["Ignore", "Smart", "Respect"]),
        doc: "Case sensitivity of workspace symbol search",
    },
    OptionSpec {
        path: "diagnostics",
        kind: OptionKind::Section,
        doc: "Diagnostics publishing",
    },
    OptionSpec {
        path: "diagnostics.enabled",
        kind: OptionKind::Bool,
        doc: "Publish diagnostics at all",
    },
    OptionSpec {
        path: "diagnostics.unresolved_dependencies",
        kind: OptionKind::Bool,
        doc: "Warn about dependencies that no indexed scope provides",
    },
    OptionSpec {
        path: "diagnostics.max_per_file",
        kind: OptionKind::Integer { min: 1, max: 10_000 },
        doc: "Upper bound on diagnostics published for one file",
    },
    OptionSpec {
        path: "index",
        kind: OptionKind::Section,
        doc: "Workspace index",
    },
    OptionSpec {
        path: "index.enabled",
        kind: OptionKind::Bool,
        doc: "Scan the workspace on startup",
    },
    OptionSpec {
        path: "index.batch_size",
        kind: OptionKind::Integer { min: 1, max: 10_000 },
        doc: "Files processed between yields",
    },
    OptionSpec {
        path: "index.exclude",
        kind: OptionKind::StringList,
        doc: "Directory names to skip",
    },
    OptionSpec {
        path: "index.max_file_size",
        kind: OptionKind::Integer { min: 1, max: 1 << 30 },
        doc: "Largest file (bytes) the index reads",
    },
    OptionSpec {
        path: "telemetry",
        kind: OptionKind::Section,
        doc: "Error and performance recording",
    },
    OptionSpec {
        path: "telemetry.max_metrics",
        kind: OptionKind::Integer { min: 1, max: 1_000_000 },
        doc: "Size of the performance metric window",
    },
    OptionSpec {
        path: "telemetry.slow_request_ms",
        kind: OptionKind::Integer { min: 1, max: 600_000 },
        doc: "Requests slower than this are logged",
    },
    OptionSpec {
        path: "providers",
        kind: OptionKind::Section,
        doc: "Query providers",
    },
    OptionSpec {
        path: "providers.hover",
        kind: OptionKind::Bool,
        doc: "Answer hover requests",
    },
    OptionSpec {
        path: "providers.completion",
        kind: OptionKind::Bool,
        doc: "Answer completion requests",
    },
    OptionSpec {
        path: "providers.timeout_ms",
        kind: OptionKind::Integer { min: 10, max: 600_000 },
        doc: "Watchdog for a single provider call",
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("option `{path}` expects {expected}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
    },
    #[error("option `{path}` must be between {min} and {max}, got {value}")]
    OutOfRange {
        path: String,
        min: i64,
        max: i64,
        value: i64,
    },
    #[error("option `{path}` must be one of {choices}, got `{value}`")]
    InvalidChoice {
        path: String,
        value: String,
        choices: String,
    },
}

pub fn option(path: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.path == path)
}

/// Checks `value` against [`OPTIONS`].
///
/// Returns a copy that keeps only the valid options, and every problem found.
/// Integers sent as strings (common with file-based sources) are accepted.
pub fn validate_options(value: &Value) -> (Value, Vec<ConfigError>) {
    let mut errors = Vec::new();
    let sanitized = match value {
        Value::Object(map) => Value::Object(validate_section("", map, &mut errors)),
        Value::Null => Value::Object(Map::new()),
        _ => {
            errors.push(ConfigError::TypeMismatch {
                path: "<root>".to_string(),
                expected: OptionKind::Section.expected(),
            });
            Value::Object(Map::new())
        }
    };
    (sanitized, errors)
}

fn validate_section(prefix: &str, map: &Map<String, Value>, errors: &mut Vec<ConfigError>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let Some(spec) = option(&path) else {
            errors.push(ConfigError::UnknownOption(path));
            continue;
        };
        let mismatch = || ConfigError::TypeMismatch {
            path: path.clone(),
            expected: spec.kind.expected(),
        };

        let checked = match (spec.kind, value) {
            (OptionKind::Section, Value::Object(inner)) => {
                Ok(Value::Object(validate_section(&path, inner, errors)))
            }
            (OptionKind::Bool, Value::Bool(_)) => Ok(value.clone()),
            (OptionKind::Integer { min, max }, _) => {
                let number = match value {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                match number {
                    Some(n) if n < min || n > max => Err(ConfigError::OutOfRange {
                        path: path.clone(),
                        min,
                        max,
                        value: n,
                    }),
                    Some(n) => Ok(Value::from(n)),
                    None => Err(mismatch()),
                }
            }
            (OptionKind::Choice(choices), Value::String(s)) => {
                match choices.iter().find(|c| c.eq_ignore_ascii_case(s)) {
                    Some(choice) => Ok(Value::String(choice.to_string())),
                    None => Err(ConfigError::InvalidChoice {
                        path: path.clone(),
                        value: s.clone(),
                        choices: choices.join(", "),
                    }),
                }
            }
            (OptionKind::StringList, Value::Array(items)) if items.iter().all(Value::is_string) => {
                Ok(value.clone())
            }
            _ => Err(mismatch()),
        };

        match checked {
            Ok(value) => {
                out.insert(key.clone(), value);
            }
            Err(err) => errors.push(err),
        }
    }
    out
}

fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

impl Settings {
    pub fn new(root_dir: &Path, capabilities: &ClientCapabilities) -> anyhow::Result<(Settings, Vec<ConfigError>)> {
        let expanded = shellexpand::tilde("~/.config/rhema/lsp");
        let defaults = Settings::default();
        let settings = Config::builder()
            .add_source(File::with_name(&expanded).required(false))
            .add_source(
                File::with_name(&format!(
                    "{}/.rhema/lsp",
                    root_dir
                        .to_str()
                        .ok_or(anyhow!("Can't convert root_dir to str"))?
                ))
                .required(false),
            )
            .set_override_option(
                "semantic_tokens",
                capabilities.text_document.as_ref().and_then(|it| {
                    match it.semantic_tokens.is_none() {
                        true => Some(false),
                        false => None,
                    }
                }),
            )?
            .build()
            .map_err(|err| anyhow!("Build err: {err}"))?;

        let raw = settings.try_deserialize::<Value>()?;
        defaults.with_overrides(&raw)
    }

    /// Layers `overrides` on top of these settings.
    ///
    /// Invalid options are dropped and reported; everything else applies.
    pub fn with_overrides(&self, overrides: &Value) -> anyhow::Result<(Settings, Vec<ConfigError>)> {
        let (sanitized, errors) = validate_options(overrides);
        let mut merged = serde_json::to_value(self)?;
        merge(&mut merged, sanitized);
        let settings = serde_json::from_value::<Settings>(merged)?;
        anyhow::Ok((settings, errors))
    }

    /// Settings sent by the client in `workspace/didChangeConfiguration`.
    ///
    /// Clients usually nest ours under a `rhema` key.
    pub fn from_client_value(&self, value: &Value) -> anyhow::Result<(Settings, Vec<ConfigError>)> {
        let section = value.get("rhema").unwrap_or(value);
        self.with_overrides(section)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            semantic_tokens: true,
            case_matching: Case::Smart,
            diagnostics: DiagnosticsSettings::default(),
            index: IndexSettings::default(),
            telemetry: TelemetrySettings::default(),
            providers: ProviderSettings::default(),
        }
    }
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        DiagnosticsSettings {
            enabled: true,
            unresolved_dependencies: true,
            max_per_file: 200,
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            enabled: true,
            batch_size: 32,
            exclude: vec![
                "node_modules".to_string(),
                "target".to_string(),
                "vendor".to_string(),
            ],
            max_file_size: 1 << 20,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        TelemetrySettings {
            max_metrics: crate::telemetry::DEFAULT_CAPACITY,
            slow_request_ms: 200,
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            hover: true,
            completion: true,
            timeout_ms: 2_000,
        }
    }
}
