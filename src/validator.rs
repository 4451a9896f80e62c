//! Schema and domain-rule checks over a parsed document.
//!
//! Each run produces the complete diagnostic set for a document, sorted so
//! that validating unchanged input twice gives identical output.

use std::collections::{HashMap, HashSet};

use serde_json::Value as JsonValue;
use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticRelatedInformation, DiagnosticSeverity, Location, Range, Url,
};
use tracing::debug;

use crate::document::{DocumentKind, Layout, Outline, PathSegment, RhemaDocument, Section};
use crate::schema;

pub const SOURCE: &str = "rhema";

/// Another scope in a dependency cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleMember {
    pub uri: Url,
    pub name: String,
    pub range: Range,
}

/// What the validator needs to know about the rest of the workspace.
pub trait ScopeResolver {
    /// False until the workspace has been indexed once.
    fn is_ready(&self) -> bool;

    fn resolves_scope(&self, name: &str) -> bool;

    /// Whether `path`, relative to the directory of `from`, points at a scope.
    fn resolves_path(&self, from: &Url, path: &str) -> bool;

    /// The other scopes in the dependency cycle `uri` belongs to, in cycle order.
    fn cycle_members(&self, uri: &Url) -> Vec<CycleMember>;
}

/// Resolver for documents validated outside of any workspace.
pub struct NoWorkspace;

impl ScopeResolver for NoWorkspace {
    fn is_ready(&self) -> bool {
        false
    }

    fn resolves_scope(&self, _name: &str) -> bool {
        false
    }

    fn resolves_path(&self, _from: &Url, _path: &str) -> bool {
        false
    }

    fn cycle_members(&self, _uri: &Url) -> Vec<CycleMember> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    pub unresolved_dependencies: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        ValidationOptions {
            unresolved_dependencies: true,
        }
    }
}

fn diagnostic(range: Range, severity: DiagnosticSeverity, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(severity),
        source: Some(SOURCE.into()),
        message,
        ..Default::default()
    }
}

/// Narrowest useful range for the node at `path`: its key, the first key of
/// a list item, or its value.
fn head_range(outline: &Outline, path: &[PathSegment]) -> Range {
    let Some(node) = outline.locate_nearest(path) else {
        return Range::default();
    };
    if let Some(range) = node.key_range {
        return range;
    }
    let first_key = node
        .children
        .first()
        .and_then(|&child| outline.node(child).key_range);
    first_key.or(node.value_range).unwrap_or(node.range)
}

pub fn validate(
    document: &RhemaDocument,
    resolver: &dyn ScopeResolver,
    options: ValidationOptions,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    schema_diagnostics(document, &mut diagnostics);
    duplicate_ids(document, &mut diagnostics);
    todo_dependencies(document, &mut diagnostics);
    superseded_decisions(document, &mut diagnostics);
    scope_rules(document, resolver, options, &mut diagnostics);

    diagnostics.sort_by(|a, b| {
        (a.range.start.line, a.range.start.character, &a.message).cmp(&(
            b.range.start.line,
            b.range.start.character,
            &b.message,
        ))
    });
    diagnostics
}

fn schema_diagnostics(document: &RhemaDocument, out: &mut Vec<Diagnostic>) {
    if document.value.is_null() {
        return;
    }
    let instance = match serde_json::to_value(&document.value) {
        Ok(instance) => instance,
        Err(err) => {
            debug!(uri = %document.uri, "skipping schema check: {err}");
            return;
        }
    };
    if !matches!(instance, JsonValue::Object(_)) {
        return;
    }

    let flat = document.layout == Layout::FlatScope;
    for issue in schema::check(&instance, flat) {
        if issue.unknown_key {
            out.push(diagnostic(
                document.outline.key_range_for(&issue.path),
                DiagnosticSeverity::WARNING,
                issue.message,
            ));
        } else {
            out.push(diagnostic(
                head_range(&document.outline, &issue.path),
                DiagnosticSeverity::ERROR,
                issue.message,
            ));
        }
    }
}

fn duplicate_ids(document: &RhemaDocument, out: &mut Vec<Diagnostic>) {
    for node in document.sections.iter().filter(|node| node.section.is_list()) {
        let mut seen: HashMap<&str, Range> = HashMap::new();
        for record in &node.records {
            let Some(id) = record.id() else {
                continue;
            };
            match seen.get(id) {
                Some(first) => {
                    let mut diag = diagnostic(
                        record.name_range,
                        DiagnosticSeverity::ERROR,
                        format!(
                            "duplicate {} id `{id}` (first declared on line {})",
                            node.section.record_label(),
                            first.start.line + 1
                        ),
                    );
                    diag.related_information = Some(vec![DiagnosticRelatedInformation {
                        location: Location::new(document.uri.clone(), *first),
                        message: "first declaration".to_string(),
                    }]);
                    out.push(diag);
                }
                None => {
                    seen.insert(id, record.name_range);
                }
            }
        }
    }
}

fn todo_dependencies(document: &RhemaDocument, out: &mut Vec<Diagnostic>) {
    let Some(todos) = document.section(Section::Todos) else {
        return;
    };
    let ids: HashSet<&str> = todos.records.iter().filter_map(|r| r.id()).collect();
    for record in &todos.records {
        let Some(field) = record.field("depends_on") else {
            continue;
        };
        for item in &field.items {
            if record.id() == Some(item.value.as_str()) {
                out.push(diagnostic(
                    item.range,
                    DiagnosticSeverity::ERROR,
                    format!("todo `{}` depends on itself", item.value),
                ));
            } else if !ids.contains(item.value.as_str()) {
                out.push(diagnostic(
                    item.range,
                    DiagnosticSeverity::WARNING,
                    format!("unknown todo `{}` in depends_on", item.value),
                ));
            }
        }
    }
}

fn superseded_decisions(document: &RhemaDocument, out: &mut Vec<Diagnostic>) {
    let Some(decisions) = document.section(Section::Decisions) else {
        return;
    };
    for record in &decisions.records {
        if record.str_field("status") == Some("superseded") && record.field("superseded_by").is_none() {
            let range = record
                .field("status")
                .map(|f| f.value_range)
                .unwrap_or(record.name_range);
            out.push(diagnostic(
                range,
                DiagnosticSeverity::INFORMATION,
                format!(
                    "decision `{}` is superseded but does not name its successor in `superseded_by`",
                    record.name.as_deref().unwrap_or("?")
                ),
            ));
        }
    }
}

fn scope_rules(
    document: &RhemaDocument,
    resolver: &dyn ScopeResolver,
    options: ValidationOptions,
    out: &mut Vec<Diagnostic>,
) {
    let Some(scope) = &document.scope else {
        if document.kind == DocumentKind::Scope && !document.is_empty() {
            let range = document
                .outline
                .roots()
                .next()
                .and_then(|node| node.key_range)
                .unwrap_or_default();
            out.push(diagnostic(
                range,
                DiagnosticSeverity::WARNING,
                "scope file has no `scope` section".to_string(),
            ));
        }
        return;
    };
    let own_name = scope.name.as_ref().map(|n| n.value.as_str());

    let mut seen = HashSet::new();
    for dependency in &scope.dependencies {
        let name = dependency.name.as_str();
        if Some(name) == own_name {
            out.push(diagnostic(
                dependency.name_range,
                DiagnosticSeverity::ERROR,
                format!("scope `{name}` depends on itself"),
            ));
            continue;
        }
        if !seen.insert(name) {
            out.push(diagnostic(
                dependency.name_range,
                DiagnosticSeverity::WARNING,
                format!("duplicate dependency `{name}`"),
            ));
            continue;
        }
        if options.unresolved_dependencies && resolver.is_ready() {
            let resolved = resolver.resolves_scope(name)
                || dependency
                    .path
                    .as_deref()
                    .is_some_and(|path| resolver.resolves_path(&document.uri, path));
            if !resolved {
                out.push(diagnostic(
                    dependency.name_range,
                    DiagnosticSeverity::WARNING,
                    format!("dependency `{name}` does not match any scope in the workspace"),
                ));
            }
        }
    }

    let members = resolver.cycle_members(&document.uri);
    if let (Some(name), false) = (&scope.name, members.is_empty()) {
        let chain = std::iter::once(name.value.as_str())
            .chain(members.iter().map(|m| m.name.as_str()))
            .chain(std::iter::once(name.value.as_str()))
            .collect::<Vec<_>>()
            .join(" -> ");
        let mut diag = diagnostic(
            name.range,
            DiagnosticSeverity::WARNING,
            format!("scope `{}` is part of a dependency cycle: {chain}", name.value),
        );
        diag.related_information = Some(
            members
                .into_iter()
                .map(|member| DiagnosticRelatedInformation {
                    location: Location::new(member.uri, member.range),
                    message: format!("`{}` is in the cycle", member.name),
                })
                .collect(),
        );
        out.push(diag);
    }
}
