use std::fmt;

use serde_yaml::Value;
use tower_lsp::lsp_types::{Range, SymbolKind, Url};

use super::{DocumentKind, Outline};

/// Top-level sections of a Rhema document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Section {
    Scope,
    Context,
    Todos,
    Decisions,
    Patterns,
    Insights,
    Conventions,
}

impl Section {
    pub const ALL: [Section; 7] = [
        Section::Scope,
        Section::Context,
        Section::Todos,
        Section::Decisions,
        Section::Patterns,
        Section::Insights,
        Section::Conventions,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Section::Scope => "scope",
            Section::Context => "context",
            Section::Todos => "todos",
            Section::Decisions => "decisions",
            Section::Patterns => "patterns",
            Section::Insights => "insights",
            Section::Conventions => "conventions",
        }
    }

    pub fn from_key(key: &str) -> Option<Section> {
        Section::ALL.into_iter().find(|section| section.key() == key)
    }

    /// Singular noun for one record of this section.
    pub fn record_label(&self) -> &'static str {
        match self {
            Section::Scope => "scope",
            Section::Context => "context entry",
            Section::Todos => "todo",
            Section::Decisions => "decision",
            Section::Patterns => "pattern",
            Section::Insights => "insight",
            Section::Conventions => "convention",
        }
    }

    /// Sections that hold a list of records; the rest are mappings.
    pub fn is_list(&self) -> bool {
        !matches!(self, Section::Scope | Section::Context)
    }

    pub fn symbol_kind(&self) -> SymbolKind {
        match self {
            Section::Scope => SymbolKind::NAMESPACE,
            Section::Context => SymbolKind::PROPERTY,
            Section::Todos => SymbolKind::EVENT,
            Section::Decisions => SymbolKind::OBJECT,
            Section::Patterns => SymbolKind::CLASS,
            Section::Insights => SymbolKind::STRING,
            Section::Conventions => SymbolKind::INTERFACE,
        }
    }

    /// Fields tried, in order, to name a record.
    pub fn name_keys(&self) -> &'static [&'static str] {
        match self {
            Section::Todos | Section::Decisions => &["id", "title"],
            Section::Insights => &["id", "title", "name"],
            _ => &["id", "name", "title"],
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub range: Range,
}

impl<T> Spanned<T> {
    pub fn new(value: T, range: Range) -> Self {
        Spanned { value, range }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: String,
    pub key_range: Range,
    pub value: Value,
    pub value_range: Range,
    /// Scalar entries when the value is a list, e.g. `depends_on`.
    pub items: Vec<Spanned<String>>,
}

impl Field {
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// One entry of a section: a todo, a decision, a context key, ...
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub section: Section,
    pub index: usize,
    pub name: Option<String>,
    pub name_range: Range,
    pub range: Range,
    pub value: Value,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.key == key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Field::as_str)
    }

    /// `id` if present; the key used for cross references.
    pub fn id(&self) -> Option<&str> {
        self.str_field("id")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub name_range: Range,
    pub version: Option<String>,
    pub path: Option<String>,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeHeader {
    pub name: Option<Spanned<String>>,
    pub scope_type: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub range: Range,
    pub key_range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SectionNode {
    pub section: Section,
    pub key_range: Range,
    pub range: Range,
    pub records: Vec<Record>,
}

/// How the scope header is laid out in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Sections under top-level keys (`scope:`, `todos:`, ...).
    Sectioned,
    /// A scope file whose root mapping is the scope itself (`name:` at top level).
    FlatScope,
}

/// A successfully parsed document.
#[derive(Debug, Clone)]
pub struct RhemaDocument {
    pub uri: Url,
    pub kind: DocumentKind,
    pub layout: Layout,
    pub value: Value,
    pub outline: Outline,
    pub scope: Option<ScopeHeader>,
    pub sections: Vec<SectionNode>,
}

impl RhemaDocument {
    pub fn empty(uri: Url, kind: DocumentKind) -> Self {
        RhemaDocument {
            uri,
            kind,
            layout: Layout::Sectioned,
            value: Value::Null,
            outline: Outline::default(),
            scope: None,
            sections: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_none() && self.sections.is_empty()
    }

    pub fn section(&self, section: Section) -> Option<&SectionNode> {
        self.sections.iter().find(|node| node.section == section)
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.sections.iter().flat_map(|node| node.records.iter())
    }

    pub fn scope_name(&self) -> Option<&str> {
        self.scope
            .as_ref()
            .and_then(|scope| scope.name.as_ref())
            .map(|name| name.value.as_str())
    }

    /// Named entities declared in this document, in document order.
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols = Vec::new();
        let scope_name = self.scope_name().map(str::to_string);

        if let Some(scope) = &self.scope {
            if let Some(name) = &scope.name {
                symbols.push(Symbol {
                    name: name.value.clone(),
                    kind: SymbolKind::NAMESPACE,
                    range: name.range,
                    full_range: scope.range,
                    container_name: None,
                    section: Section::Scope,
                });
            }
            for dependency in &scope.dependencies {
                symbols.push(Symbol {
                    name: dependency.name.clone(),
                    kind: SymbolKind::PACKAGE,
                    range: dependency.name_range,
                    full_range: dependency.range,
                    container_name: scope_name.clone(),
                    section: Section::Scope,
                });
            }
        }

        for record in self.records() {
            let Some(name) = &record.name else {
                continue;
            };
            symbols.push(Symbol {
                name: name.clone(),
                kind: record.section.symbol_kind(),
                range: record.name_range,
                full_range: record.range,
                container_name: Some(
                    scope_name
                        .clone()
                        .unwrap_or_else(|| record.section.key().to_string()),
                ),
                section: record.section,
            });
        }

        symbols
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Range of the declaring name.
    pub range: Range,
    /// Range of the whole declaration.
    pub full_range: Range,
    pub container_name: Option<String>,
    pub section: Section,
}
