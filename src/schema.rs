//! The embedded Rhema JSON Schema.
//!
//! The schema is compiled once. Besides validation it is the source of key
//! documentation and enum values for completion and hover.

use jsonschema::error::ValidationErrorKind;
use once_cell::sync::Lazy;
use serde_json::Value;
use tracing::error;

use crate::document::{PathSegment, Section};

static SCHEMA_SOURCE: &str = include_str!("schema/rhema.schema.json");

static SCHEMA: Lazy<Value> = Lazy::new(|| match serde_json::from_str(SCHEMA_SOURCE) {
    Ok(schema) => schema,
    Err(err) => {
        error!("embedded schema is not valid JSON: {err}");
        Value::Null
    }
});

static DOCUMENT_VALIDATOR: Lazy<Option<jsonschema::Validator>> = Lazy::new(|| compile(&SCHEMA));

static SCOPE_VALIDATOR: Lazy<Option<jsonschema::Validator>> = Lazy::new(|| {
    let mut schema = serde_json::Map::new();
    schema.insert("definitions".to_string(), SCHEMA["definitions"].clone());
    schema.insert("$ref".to_string(), Value::from("#/definitions/scope"));
    compile(&Value::Object(schema))
});

fn compile(schema: &Value) -> Option<jsonschema::Validator> {
    match jsonschema::validator_for(schema) {
        Ok(validator) => Some(validator),
        Err(err) => {
            error!("failed to compile embedded schema: {err}");
            None
        }
    }
}

/// A schema violation located by its path in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub path: Vec<PathSegment>,
    pub message: String,
    /// The violation is a key the schema does not know.
    pub unknown_key: bool,
}

/// Checks a whole document, or just its root as a scope when the file uses
/// the flat scope layout.
pub fn check(instance: &Value, flat_scope: bool) -> Vec<SchemaIssue> {
    let validator = if flat_scope {
        &*SCOPE_VALIDATOR
    } else {
        &*DOCUMENT_VALIDATOR
    };
    let Some(validator) = validator else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    for err in validator.iter_errors(instance) {
        let path = pointer_to_path(instance, &err.instance_path.to_string());
        match &err.kind {
            ValidationErrorKind::AdditionalProperties { unexpected } => {
                for key in unexpected {
                    let mut key_path = path.clone();
                    key_path.push(PathSegment::Key(key.clone()));
                    issues.push(SchemaIssue {
                        path: key_path,
                        message: format!("unknown key `{key}`"),
                        unknown_key: true,
                    });
                }
            }
            _ => issues.push(SchemaIssue {
                path,
                message: err.to_string(),
                unknown_key: false,
            }),
        }
    }
    issues
}

/// Turns a JSON pointer into path segments, using the instance to tell list
/// indices from numeric keys.
fn pointer_to_path(instance: &Value, pointer: &str) -> Vec<PathSegment> {
    let mut path = Vec::new();
    let mut current = Some(instance);
    for raw in pointer.split('/').skip(1) {
        let token = raw.replace("~1", "/").replace("~0", "~");
        match current {
            Some(Value::Array(items)) => match token.parse::<usize>() {
                Ok(index) => {
                    current = items.get(index);
                    path.push(PathSegment::Index(index));
                }
                Err(_) => break,
            },
            Some(Value::Object(map)) => {
                current = map.get(&token);
                path.push(PathSegment::Key(token));
            }
            _ => break,
        }
    }
    path
}

fn definition_name(section: Section) -> Option<&'static str> {
    match section {
        Section::Scope => Some("scope"),
        Section::Context => None,
        Section::Todos => Some("todo"),
        Section::Decisions => Some("decision"),
        Section::Patterns => Some("pattern"),
        Section::Insights => Some("insight"),
        Section::Conventions => Some("convention"),
    }
}

fn record_properties(section: Section) -> Option<&'static serde_json::Map<String, Value>> {
    let name = definition_name(section)?;
    SCHEMA["definitions"][name]["properties"].as_object()
}

/// Keys a record of `section` may carry, in schema order.
pub fn record_keys(section: Section) -> Vec<&'static str> {
    record_properties(section)
        .map(|props| props.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

pub fn required_keys(section: Section) -> Vec<&'static str> {
    definition_name(section)
        .and_then(|name| SCHEMA["definitions"][name]["required"].as_array())
        .map(|required| required.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

pub fn dependency_keys() -> Vec<&'static str> {
    SCHEMA["definitions"]["dependency"]["oneOf"][1]["properties"]
        .as_object()
        .map(|props| props.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

pub fn section_keys() -> Vec<&'static str> {
    SCHEMA["properties"]
        .as_object()
        .map(|props| props.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

pub fn field_description(section: Section, key: &str) -> Option<&'static str> {
    record_properties(section)?.get(key)?["description"].as_str()
}

pub fn section_description(key: &str) -> Option<&'static str> {
    match Section::from_key(key)? {
        Section::Context => SCHEMA["properties"]["context"]["description"].as_str(),
        Section::Scope => Some("Name, type and dependencies of this scope."),
        Section::Todos => Some("Work items tracked for this scope."),
        Section::Decisions => Some("Architecture decisions and their status."),
        Section::Patterns => Some("Recurring solutions used in this scope."),
        Section::Insights => Some("Lessons learned while working on this scope."),
        Section::Conventions => Some("Rules the code in this scope follows."),
    }
}

/// Allowed values of an enum-typed field.
pub fn enum_values(section: Section, key: &str) -> Vec<&'static str> {
    record_properties(section)
        .and_then(|props| props.get(key))
        .and_then(|prop| prop["enum"].as_array())
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_schema_compiles() {
        assert!(DOCUMENT_VALIDATOR.is_some());
        assert!(SCOPE_VALIDATOR.is_some());
    }

    #[test]
    fn test_unknown_keys_are_flagged_per_key() {
        let issues = check(&json!({ "todos": [{ "id": "a", "title": "t", "colour": "red" }] }), false);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].unknown_key);
        assert_eq!(
            issues[0].path,
            vec![PathSegment::key("todos"), PathSegment::Index(0), PathSegment::key("colour")]
        );
    }

    #[test]
    fn test_enum_and_required_violations() {
        let issues = check(&json!({ "todos": [{ "id": "a", "status": "done" }] }), false);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|issue| !issue.unknown_key));
        assert!(issues
            .iter()
            .any(|issue| issue.path.last() == Some(&PathSegment::key("status"))));
    }

    #[test]
    fn test_flat_scope_is_checked_as_scope() {
        assert!(check(&json!({ "name": "core", "dependencies": ["base"] }), true).is_empty());
        let issues = check(&json!({ "dependencies": [] }), true);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].path.is_empty());
    }

    #[test]
    fn test_numeric_keys_are_not_indices() {
        let path = pointer_to_path(&json!({ "context": { "0": { "a": 1 } } }), "/context/0/a");
        assert_eq!(
            path,
            vec![PathSegment::key("context"), PathSegment::key("0"), PathSegment::key("a")]
        );
    }

    #[test]
    fn test_lookups_for_completion() {
        assert!(record_keys(Section::Todos).contains(&"depends_on"));
        assert_eq!(required_keys(Section::Decisions), vec!["id", "title", "status"]);
        assert_eq!(enum_values(Section::Todos, "priority"), vec!["low", "medium", "high", "critical"]);
        assert!(field_description(Section::Todos, "status").is_some());
        assert!(dependency_keys().contains(&"path"));
        assert_eq!(section_keys().len(), 7);
    }
}
