//! Text to [`RhemaDocument`].
//!
//! serde_yaml decides what the document means and reports syntax errors; the
//! [`Outline`] supplies the ranges that serde_yaml does not keep.

use std::panic::{catch_unwind, AssertUnwindSafe};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tower_lsp::lsp_types::{Position, Range, Url};
use tracing::debug;

use super::outline::{line_chars, Outline, PathSegment};
use super::types::*;
use super::DocumentKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub range: Range,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum ParseResult {
    Success(Box<RhemaDocument>),
    /// Always carries at least one error.
    Failure(Vec<ParseError>),
}

impl ParseResult {
    pub fn document(&self) -> Option<&RhemaDocument> {
        match self {
            ParseResult::Success(document) => Some(document),
            ParseResult::Failure(_) => None,
        }
    }

    pub fn errors(&self) -> &[ParseError] {
        match self {
            ParseResult::Success(_) => &[],
            ParseResult::Failure(errors) => errors,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ParseResult::Success(_))
    }
}

static LOCATION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+at line \d+ column \d+$").expect("location pattern is valid"));

pub fn parse(text: &str, uri: &Url) -> ParseResult {
    let kind = DocumentKind::classify_uri(uri).unwrap_or(DocumentKind::Generic);
    match catch_unwind(AssertUnwindSafe(|| parse_inner(text, uri, kind))) {
        Ok(result) => result,
        Err(_) => ParseResult::Failure(vec![ParseError {
            range: Range::default(),
            message: "internal error while parsing document".to_string(),
        }]),
    }
}

fn is_blank_document(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim_start_matches('\u{feff}').trim();
        line.is_empty() || line.starts_with('#') || line == "---" || line == "..."
    })
}

fn parse_inner(text: &str, uri: &Url, kind: DocumentKind) -> ParseResult {
    // serde_yaml sees the text without the byte order mark; ranges keep it.
    let yaml = text.strip_prefix('\u{feff}').unwrap_or(text);
    if is_blank_document(yaml) {
        let mut document = RhemaDocument::empty(uri.clone(), kind);
        document.outline = Outline::parse(text);
        return ParseResult::Success(Box::new(document));
    }

    let value: Value = match serde_yaml::from_str(yaml) {
        Ok(value) => value,
        Err(err) => {
            debug!(%uri, "yaml syntax error: {err}");
            return ParseResult::Failure(vec![syntax_error(&err, text)]);
        }
    };

    let outline = Outline::parse(text);
    let root = match value {
        Value::Null => Mapping::new(),
        Value::Mapping(ref mapping) => mapping.clone(),
        _ => {
            let range = outline
                .nodes()
                .first()
                .map(|node| node.range)
                .unwrap_or_else(|| first_content_range(text));
            return ParseResult::Failure(vec![ParseError {
                range,
                message: format!(
                    "document root must be a mapping of sections, found {}",
                    describe(&value)
                ),
            }]);
        }
    };

    let builder = TreeBuilder { outline: &outline };
    let mut errors = Vec::new();
    let mut sections = Vec::new();
    let mut scope = None;

    let has_sections = root
        .keys()
        .filter_map(Value::as_str)
        .any(|key| Section::from_key(key).is_some());
    let layout = if kind == DocumentKind::Scope && !has_sections && root.contains_key("name") {
        Layout::FlatScope
    } else {
        Layout::Sectioned
    };

    if layout == Layout::FlatScope {
        scope = Some(builder.scope_header(&root, &[]));
    }

    for (key, section_value) in &root {
        let Some(section) = key.as_str().and_then(Section::from_key) else {
            continue;
        };
        let path = [PathSegment::key(section.key())];
        let key_range = outline.key_range_for(&path);

        match (section, section_value) {
            (Section::Scope, Value::Mapping(mapping)) => {
                scope = Some(builder.scope_header(mapping, &path));
            }
            (Section::Context, Value::Mapping(mapping)) => sections.push(SectionNode {
                section,
                key_range,
                range: builder.range_of(&path),
                records: builder.context_records(mapping),
            }),
            (_, Value::Sequence(items)) if section.is_list() => sections.push(SectionNode {
                section,
                key_range,
                range: builder.range_of(&path),
                records: builder.list_records(section, items),
            }),
            (_, Value::Null) => sections.push(SectionNode {
                section,
                key_range,
                range: builder.range_of(&path),
                records: Vec::new(),
            }),
            (_, other) => errors.push(ParseError {
                range: key_range,
                message: format!(
                    "`{}` must be {}, found {}",
                    section.key(),
                    if section.is_list() { "a list" } else { "a mapping" },
                    describe(other)
                ),
            }),
        }
    }

    if !errors.is_empty() {
        errors.sort_by_key(|e| (e.range.start.line, e.range.start.character));
        return ParseResult::Failure(errors);
    }

    ParseResult::Success(Box::new(RhemaDocument {
        uri: uri.clone(),
        kind,
        layout,
        value,
        outline,
        scope,
        sections,
    }))
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "nothing",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Key text of a mapping entry; non-string keys are rendered.
pub(crate) fn key_string(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(_) | Value::Bool(_) => key_string(value),
        _ => None,
    }
}

fn first_content_range(text: &str) -> Range {
    for (line, content) in text.split('\n').enumerate() {
        let chars = line_chars(content);
        if let Some(start) = chars.iter().position(|c| !c.is_whitespace() && *c != '\u{feff}') {
            return line_range(line as u32, start as u32, chars.len() as u32);
        }
    }
    Range::default()
}

fn line_range(line: u32, start: u32, end: u32) -> Range {
    Range {
        start: Position { line, character: start },
        end: Position { line, character: end.max(start) },
    }
}

fn syntax_error(err: &serde_yaml::Error, text: &str) -> ParseError {
    let message = LOCATION_SUFFIX.replace(&err.to_string(), "").into_owned();
    let range = match err.location() {
        Some(location) => {
            let line = location.line().saturating_sub(1);
            let bom = u32::from(line == 0 && text.starts_with('\u{feff}'));
            let column = location.column().saturating_sub(1) as u32 + bom;
            let width = text
                .split('\n')
                .nth(line)
                .map(|content| line_chars(content).len() as u32)
                .unwrap_or(column);
            line_range(line as u32, column.min(width), width.max(column + 1))
        }
        None => first_content_range(text),
    };
    ParseError { range, message }
}

struct TreeBuilder<'a> {
    outline: &'a Outline,
}

impl TreeBuilder<'_> {
    fn range_of(&self, path: &[PathSegment]) -> Range {
        self.outline
            .locate_nearest(path)
            .map(|node| node.range)
            .unwrap_or_default()
    }

    fn fields(&self, mapping: &Mapping, path: &[PathSegment]) -> Vec<Field> {
        mapping
            .iter()
            .filter_map(|(key, value)| {
                let key = key_string(key)?;
                let mut field_path = path.to_vec();
                field_path.push(PathSegment::Key(key.clone()));
                let key_range = self.outline.key_range_for(&field_path);
                let value_range = self.outline.value_range_for(&field_path);

                let items = match value {
                    Value::Sequence(seq) => seq
                        .iter()
                        .enumerate()
                        .filter_map(|(i, item)| {
                            let text = scalar_string(item)?;
                            let mut item_path = field_path.clone();
                            item_path.push(PathSegment::Index(i));
                            let range = self
                                .outline
                                .locate(&item_path)
                                .and_then(|node| node.value_range)
                                .unwrap_or(value_range);
                            Some(Spanned::new(text, range))
                        })
                        .collect(),
                    _ => Vec::new(),
                };

                Some(Field {
                    key,
                    key_range,
                    value: value.clone(),
                    value_range,
                    items,
                })
            })
            .collect()
    }

    fn list_records(&self, section: Section, items: &[Value]) -> Vec<Record> {
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let path = [PathSegment::key(section.key()), PathSegment::Index(index)];
                let range = self.range_of(&path);
                let fields = match item {
                    Value::Mapping(mapping) => self.fields(mapping, &path),
                    _ => Vec::new(),
                };
                let named = section
                    .name_keys()
                    .iter()
                    .find_map(|key| fields.iter().find(|f| f.key == *key && f.as_str().is_some()));
                Record {
                    section,
                    index,
                    name: named.and_then(|f| f.as_str()).map(str::to_string),
                    name_range: named.map(|f| f.value_range).unwrap_or(range),
                    range,
                    value: item.clone(),
                    fields,
                }
            })
            .collect()
    }

    fn context_records(&self, mapping: &Mapping) -> Vec<Record> {
        mapping
            .iter()
            .enumerate()
            .filter_map(|(index, (key, value))| {
                let name = key_string(key)?;
                let path = [PathSegment::key("context"), PathSegment::Key(name.clone())];
                let fields = match value {
                    Value::Mapping(inner) => self.fields(inner, &path),
                    _ => Vec::new(),
                };
                Some(Record {
                    section: Section::Context,
                    index,
                    name_range: self.outline.key_range_for(&path),
                    range: self.range_of(&path),
                    name: Some(name),
                    value: value.clone(),
                    fields,
                })
            })
            .collect()
    }

    fn scope_header(&self, mapping: &Mapping, path: &[PathSegment]) -> ScopeHeader {
        let fields = self.fields(mapping, path);
        let text = |key: &str| {
            fields
                .iter()
                .find(|f| f.key == key)
                .and_then(|f| scalar_string(&f.value))
        };
        let name = fields
            .iter()
            .find(|f| f.key == "name")
            .and_then(|f| Some(Spanned::new(f.as_str()?.to_string(), f.value_range)));

        let mut dependencies = Vec::new();
        if let Some(Value::Sequence(items)) = mapping.get("dependencies") {
            let mut list_path = path.to_vec();
            list_path.push(PathSegment::key("dependencies"));
            for (i, item) in items.iter().enumerate() {
                let mut item_path = list_path.clone();
                item_path.push(PathSegment::Index(i));
                let range = self
                    .outline
                    .locate(&item_path)
                    .map(|node| node.range)
                    .unwrap_or_else(|| self.outline.value_range_for(&list_path));

                let dependency = match item {
                    Value::Mapping(entry) => {
                        let Some(name) = entry.get("name").and_then(scalar_string) else {
                            continue;
                        };
                        let mut name_path = item_path.clone();
                        name_path.push(PathSegment::key("name"));
                        Dependency {
                            name,
                            name_range: self
                                .outline
                                .locate(&name_path)
                                .and_then(|node| node.value_range)
                                .unwrap_or(range),
                            version: entry.get("version").and_then(scalar_string),
                            path: entry.get("path").and_then(scalar_string),
                            range,
                        }
                    }
                    other => {
                        let Some(name) = scalar_string(other) else {
                            continue;
                        };
                        Dependency {
                            name,
                            name_range: self
                                .outline
                                .locate(&item_path)
                                .and_then(|node| node.value_range)
                                .unwrap_or(range),
                            version: None,
                            path: None,
                            range,
                        }
                    }
                };
                dependencies.push(dependency);
            }
        }

        let (range, key_range) = if path.is_empty() {
            let range = self
                .outline
                .roots()
                .map(|node| node.range)
                .reduce(|a, b| Range { start: a.start, end: b.end })
                .unwrap_or_default();
            (range, name.as_ref().map(|n| n.range).unwrap_or(range))
        } else {
            (self.range_of(path), self.outline.key_range_for(path))
        };

        ScopeHeader {
            name,
            scope_type: text("type").or_else(|| text("scope_type")),
            description: text("description"),
            version: text("version"),
            dependencies,
            range,
            key_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(name: &str) -> Url {
        Url::parse(&format!("file:///ws/{name}")).unwrap()
    }

    const SCOPE: &str = "\
scope:
  name: test-scope
  type: service
  dependencies:
    - core
    - name: auth
      version: \"1.2\"
todos:
  - id: todo-1
    title: Write parser
    status: pending
  - id: todo-2
    title: Write validator
    depends_on: [todo-1]
";

    #[test]
    fn test_sections_and_records() {
        let result = parse(SCOPE, &uri("scope.yaml"));
        let document = result.document().expect("parses");

        assert_eq!(document.scope_name(), Some("test-scope"));
        let scope = document.scope.as_ref().unwrap();
        let deps: Vec<_> = scope.dependencies.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(deps, vec!["core", "auth"]);
        assert_eq!(scope.dependencies[1].version.as_deref(), Some("1.2"));
        assert_eq!(scope.dependencies[0].name_range.start.line, 4);

        let todos = document.section(Section::Todos).unwrap();
        assert_eq!(todos.records.len(), 2);
        assert_eq!(todos.records[1].name.as_deref(), Some("todo-2"));
        assert_eq!(todos.records[1].name_range.start.line, 11);
        assert_eq!(todos.records[1].name_range.start.character, 8);
    }

    #[test]
    fn test_flow_sequence_items_fall_back_to_field_range() {
        let result = parse(SCOPE, &uri("scope.yaml"));
        let document = result.document().unwrap();
        let todo = &document.section(Section::Todos).unwrap().records[1];
        let field = todo.field("depends_on").unwrap();
        assert_eq!(field.items[0].value, "todo-1");
        assert_eq!(field.items[0].range, field.value_range);
    }

    #[test]
    fn test_symbols_carry_kinds_and_containers() {
        let result = parse(SCOPE, &uri("scope.yaml"));
        let symbols = result.document().unwrap().symbols();
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["test-scope", "core", "auth", "todo-1", "todo-2"]);
        assert_eq!(symbols[0].kind, tower_lsp::lsp_types::SymbolKind::NAMESPACE);
        assert_eq!(symbols[3].container_name.as_deref(), Some("test-scope"));
    }

    #[test]
    fn test_empty_inputs_are_success() {
        for text in ["", "   \n\n", "# comment only\n", "\u{feff}", "---\n"] {
            let result = parse(text, &uri("todos.yaml"));
            let document = result.document().expect("empty input parses");
            assert!(document.is_empty(), "{text:?}");
        }
    }

    #[test]
    fn test_syntax_error_has_position() {
        let result = parse("name: test\n  invalid: indentation", &uri("scope.yaml"));
        let errors = result.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].range.start.line, 1);
        assert!(!errors[0].message.contains("at line"));
    }

    #[test]
    fn test_non_mapping_root_is_failure() {
        let result = parse("- a\n- b\n", &uri("todos.yaml"));
        assert!(!result.is_success());
        assert!(result.errors()[0].message.contains("mapping"));
    }

    #[test]
    fn test_wrong_section_shape_is_failure() {
        let result = parse("todos:\n  id: x\n", &uri("todos.yaml"));
        let errors = result.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].range.start.line, 0);
        assert!(errors[0].message.contains("must be a list"));
    }

    #[test]
    fn test_flat_scope_layout() {
        let result = parse("name: test\ndependencies:\n  - core\n", &uri("rhema.yaml"));
        let document = result.document().unwrap();
        assert_eq!(document.layout, Layout::FlatScope);
        assert_eq!(document.scope_name(), Some("test"));
        assert_eq!(document.scope.as_ref().unwrap().dependencies.len(), 1);
    }

    #[test]
    fn test_context_entries_are_records() {
        let text = "context:\n  architecture:\n    summary: layered\n  glossary: terms\n";
        let result = parse(text, &uri("knowledge.yaml"));
        let context = result.document().unwrap().section(Section::Context).unwrap();
        let names: Vec<_> = context.records.iter().filter_map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec!["architecture", "glossary"]);
        assert_eq!(context.records[0].name_range.start.line, 1);
    }

    #[test]
    fn test_byte_order_mark_keeps_editor_columns() {
        let result = parse("\u{feff}name: core\n", &uri("scope.yaml"));
        let symbols = result.document().unwrap().symbols();
        assert_eq!(symbols[0].name, "core");
        assert_eq!(symbols[0].range.start, Position::new(0, 7));
        assert_eq!(symbols[0].range.end, Position::new(0, 11));

        let result = parse("\u{feff}- a\n- b\n", &uri("todos.yaml"));
        assert_eq!(result.errors()[0].range.start, Position::new(0, 1));
    }
}
