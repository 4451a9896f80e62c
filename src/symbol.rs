//! Symbol providers.
//!
//! - `textDocument/documentSymbol`: outline of the current file
//! - `workspace/symbol`: fuzzy search across every indexed file
//!
//! # Document Symbols
//!
//! | Entity | LSP Kind | Children |
//! |--------|----------|----------|
//! | Scope header | `Namespace` | dependencies (`Package`) |
//! | List section (`todos:`) | `Array` | its records |
//! | Mapping section (`context:`) | `Object` | its entries |
//!
//! Record kinds follow [`Section::symbol_kind`](crate::document::Section::symbol_kind).

use tower_lsp::lsp_types::{
    DocumentSymbol, DocumentSymbolResponse, Location, SymbolInformation, SymbolKind,
};

use crate::config::Case;
use crate::context::ProviderContext;
use crate::document::{Record, RhemaDocument, Section};
use crate::workspace::{IndexSnapshot, SymbolMatch};

#[allow(deprecated)] // `deprecated` is superseded by `tags`
fn document_symbol_node(
    name: String,
    detail: Option<String>,
    kind: SymbolKind,
    range: tower_lsp::lsp_types::Range,
    selection_range: tower_lsp::lsp_types::Range,
    children: Vec<DocumentSymbol>,
) -> DocumentSymbol {
    DocumentSymbol {
        name,
        detail,
        kind,
        tags: None,
        deprecated: None,
        range,
        selection_range,
        children: (!children.is_empty()).then_some(children),
    }
}

fn record_symbol(record: &Record) -> DocumentSymbol {
    let name = record
        .name
        .clone()
        .unwrap_or_else(|| format!("{} {}", record.section.record_label(), record.index + 1));
    // Show the title next to an id so the outline stays readable.
    let detail = record
        .str_field("title")
        .filter(|title| record.name.as_deref() != Some(*title))
        .map(str::to_string);
    document_symbol_node(
        name,
        detail,
        record.section.symbol_kind(),
        record.range,
        record.name_range,
        Vec::new(),
    )
}

fn outline(document: &RhemaDocument) -> Vec<DocumentSymbol> {
    let mut symbols = Vec::new();

    if let Some(scope) = &document.scope {
        let dependencies = scope
            .dependencies
            .iter()
            .map(|dependency| {
                document_symbol_node(
                    dependency.name.clone(),
                    dependency.version.clone().or_else(|| dependency.path.clone()),
                    SymbolKind::PACKAGE,
                    dependency.range,
                    dependency.name_range,
                    Vec::new(),
                )
            })
            .collect();
        let (name, selection) = match &scope.name {
            Some(name) => (name.value.clone(), name.range),
            None => (Section::Scope.key().to_string(), scope.key_range),
        };
        symbols.push(document_symbol_node(
            name,
            scope.scope_type.clone(),
            SymbolKind::NAMESPACE,
            scope.range,
            selection,
            dependencies,
        ));
    }

    for section in document.sections.iter().filter(|s| s.section != Section::Scope) {
        let kind = if section.section.is_list() {
            SymbolKind::ARRAY
        } else {
            SymbolKind::OBJECT
        };
        symbols.push(document_symbol_node(
            section.section.key().to_string(),
            Some(format!("{} entries", section.records.len())),
            kind,
            section.range,
            section.key_range,
            section.records.iter().map(record_symbol).collect(),
        ));
    }

    symbols.sort_by_key(|symbol| (symbol.range.start.line, symbol.range.start.character));
    symbols
}

pub fn document_symbol(context: &ProviderContext) -> Option<DocumentSymbolResponse> {
    let symbols = outline(context.tree()?);
    if symbols.is_empty() {
        return None;
    }
    Some(DocumentSymbolResponse::Nested(symbols))
}

#[allow(deprecated)]
fn symbol_information(found: SymbolMatch) -> SymbolInformation {
    SymbolInformation {
        name: found.symbol.name,
        kind: found.symbol.kind,
        tags: None,
        deprecated: None,
        location: Location::new(found.uri, found.symbol.range),
        container_name: found.symbol.container_name,
    }
}

/// Fuzzy search over every indexed declaration, best match first.
pub fn workspace_symbol(index: &IndexSnapshot, query: &str, case: Case) -> Vec<SymbolInformation> {
    index
        .find_symbols(query, case)
        .into_iter()
        .map(symbol_information)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{provider_context, provider_context_with_index, test_uri};

    const PROJECT: &str = "scope:\n  name: api\n  type: service\n  dependencies:\n    - core\n    - name: auth\n      version: \"2\"\ntodos:\n  - id: todo-1\n    title: Ship it\n  - title: Untitled work\ncontext:\n  owner: platform\n";

    fn nested(response: DocumentSymbolResponse) -> Vec<DocumentSymbol> {
        match response {
            DocumentSymbolResponse::Nested(symbols) => symbols,
            DocumentSymbolResponse::Flat(_) => panic!("expected nested symbols"),
        }
    }

    #[test]
    fn test_document_outline_is_hierarchical() {
        let ctx = provider_context("project.rhema.yaml", PROJECT);
        let symbols = nested(document_symbol(&ctx).unwrap());
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["api", "todos", "context"]);

        let scope = &symbols[0];
        assert_eq!(scope.kind, SymbolKind::NAMESPACE);
        assert_eq!(scope.detail.as_deref(), Some("service"));
        let deps = scope.children.as_ref().unwrap();
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1].name, "auth");
        assert_eq!(deps[1].detail.as_deref(), Some("2"));

        let todos = &symbols[1];
        assert_eq!(todos.kind, SymbolKind::ARRAY);
        let records = todos.children.as_ref().unwrap();
        assert_eq!(records[0].name, "todo-1");
        assert_eq!(records[0].detail.as_deref(), Some("Ship it"));
        assert_eq!(records[0].kind, SymbolKind::EVENT);
        assert_eq!(records[1].name, "Untitled work");

        assert_eq!(symbols[2].kind, SymbolKind::OBJECT);
    }

    #[test]
    fn test_selection_range_inside_range() {
        let ctx = provider_context("project.rhema.yaml", PROJECT);
        fn check(symbol: &DocumentSymbol) {
            let (r, s) = (symbol.range, symbol.selection_range);
            assert!((r.start.line, r.start.character) <= (s.start.line, s.start.character));
            assert!((s.end.line, s.end.character) <= (r.end.line, r.end.character));
            symbol.children.iter().flatten().for_each(check);
        }
        nested(document_symbol(&ctx).unwrap()).iter().for_each(check);
    }

    #[test]
    fn test_empty_and_malformed_documents_have_no_outline() {
        assert!(document_symbol(&provider_context("todos.yaml", "")).is_none());
        assert!(document_symbol(&provider_context("scope.yaml", "name: test\n  invalid: indentation")).is_none());
    }

    #[test]
    fn test_workspace_symbol_fuzzy_search() {
        let ctx = provider_context_with_index(
            "api/scope.yaml",
            "scope:\n  name: api\n",
            &[("core/decisions.yaml", "decisions:\n  - id: use-postgres\n    title: Use Postgres\n    status: approved\n")],
        );
        let found = workspace_symbol(&ctx.index, "postgr", Case::Smart);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "use-postgres");
        assert_eq!(found[0].location.uri, test_uri("core/decisions.yaml"));
        assert_eq!(found[0].kind, SymbolKind::OBJECT);

        assert_eq!(workspace_symbol(&ctx.index, "", Case::Smart).len(), 2);
    }
}
