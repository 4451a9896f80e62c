//! Hover provider.
//!
//! | Target | Shows |
//! |--------|-------|
//! | Section key | What the section holds |
//! | Field key | Field documentation and allowed values |
//! | Declared name | Kind, container and where it is declared |
//!
//! Hover can be disabled with `providers.hover = false`.

use itertools::Itertools;
use tower_lsp::lsp_types::{
    Hover, HoverContents, MarkupContent, MarkupKind, Position, Range, SymbolKind, Url,
};

use crate::context::ProviderContext;
use crate::document::{Layout, PathSegment, RhemaDocument, Section, Symbol};
use crate::resolve;
use crate::schema;

pub fn hover(context: &ProviderContext, position: Position) -> Option<Hover> {
    if !context.settings.providers.hover {
        return None;
    }
    let document = context.tree()?;
    let word = resolve::word_at(context.text(), position)?;

    let markdown = key_documentation(document, position)
        .or_else(|| symbol_summary(context, document, &word.value))?;

    Some(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: markdown,
        }),
        range: Some(word.range),
    })
}

fn contains(range: Range, position: Position) -> bool {
    (range.start.line, range.start.character) <= (position.line, position.character)
        && (position.line, position.character) <= (range.end.line, range.end.character)
}

fn key_documentation(document: &RhemaDocument, position: Position) -> Option<String> {
    let outline = &document.outline;
    let (idx, node) = outline
        .nodes_on_line(position.line)
        .find(|(_, node)| node.key_range.is_some_and(|range| contains(range, position)))?;
    let key = node.key.as_deref()?;
    let path = outline.path_of(idx);
    let flat = document.layout == Layout::FlatScope;

    if path.len() == 1 && !flat {
        let description = schema::section_description(key)?;
        return Some(format!("**{key}**\n\n{description}"));
    }

    let section = if flat {
        Section::Scope
    } else {
        path.first()
            .and_then(PathSegment::as_key)
            .and_then(Section::from_key)?
    };
    let description = schema::field_description(section, key)?;
    let mut text = format!("**{key}** ({})\n\n{description}", section.record_label());
    let values = schema::enum_values(section, key);
    if !values.is_empty() {
        text.push_str(&format!(
            "\n\nOne of: {}",
            values.iter().map(|value| format!("`{value}`")).join(", ")
        ));
    }
    Some(text)
}

fn kind_label(symbol: &Symbol) -> &'static str {
    if symbol.kind == SymbolKind::PACKAGE {
        "dependency"
    } else {
        symbol.section.record_label()
    }
}

fn describe(symbol: &Symbol, uri: &Url, current: &Url) -> String {
    let mut text = format!("**{}** `{}`", kind_label(symbol), symbol.name);
    if let Some(container) = &symbol.container_name {
        text.push_str(&format!("\n\nin `{container}`"));
    }
    let line = symbol.range.start.line + 1;
    if uri == current {
        text.push_str(&format!("\n\nDeclared on line {line}"));
    } else {
        let file = uri
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or(uri.as_str());
        text.push_str(&format!("\n\nDeclared in `{file}` on line {line}"));
    }
    text
}

fn symbol_summary(context: &ProviderContext, document: &RhemaDocument, name: &str) -> Option<String> {
    let local = document.symbols();
    // Prefer a real declaration over a dependency entry naming another scope.
    if let Some(symbol) = local
        .iter()
        .filter(|symbol| symbol.name == name)
        .min_by_key(|symbol| symbol.kind == SymbolKind::PACKAGE)
    {
        if symbol.kind != SymbolKind::PACKAGE {
            return Some(describe(symbol, context.uri(), context.uri()));
        }
    }

    context
        .index
        .declarations(name)
        .iter()
        .filter(|(uri, _)| uri != context.uri())
        .find_map(|(uri, range)| {
            let symbol = context
                .index
                .file(uri)?
                .symbols
                .iter()
                .find(|symbol| symbol.name == name && symbol.range == *range)?;
            Some(describe(symbol, uri, context.uri()))
        })
        .or_else(|| {
            local
                .iter()
                .find(|symbol| symbol.name == name)
                .map(|symbol| describe(symbol, context.uri(), context.uri()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{provider_context, provider_context_with_index};

    fn markdown(hover: Hover) -> String {
        match hover.contents {
            HoverContents::Markup(markup) => markup.value,
            other => panic!("unexpected hover contents {other:?}"),
        }
    }

    #[test]
    fn test_hover_on_field_key_lists_values() {
        let text = "todos:\n  - id: a\n    title: A\n    status: pending\n";
        let ctx = provider_context("todos.yaml", text);
        let value = markdown(hover(&ctx, Position::new(3, 6)).unwrap());
        assert!(value.starts_with("**status** (todo)"));
        assert!(value.contains("`in_progress`"));
    }

    #[test]
    fn test_hover_on_section_key() {
        let ctx = provider_context("decisions.yaml", "decisions: []\n");
        let value = markdown(hover(&ctx, Position::new(0, 3)).unwrap());
        assert!(value.starts_with("**decisions**"));
    }

    #[test]
    fn test_hover_on_local_id_reference() {
        let text = "todos:\n  - id: todo-1\n    title: A\n  - id: todo-2\n    title: B\n    depends_on: [todo-1]\n";
        let ctx = provider_context("todos.yaml", text);
        let hover = hover(&ctx, Position::new(5, 20)).unwrap();
        assert_eq!(hover.range.unwrap().start, Position::new(5, 17));
        let value = markdown(hover);
        assert!(value.starts_with("**todo** `todo-1`"));
        assert!(value.contains("line 2"));
    }

    #[test]
    fn test_hover_on_dependency_uses_index() {
        let text = "scope:\n  name: api\n  dependencies:\n    - core\n";
        let ctx = provider_context_with_index(
            "svc/scope.yaml",
            text,
            &[("core/scope.yaml", "scope:\n  name: core\n")],
        );
        let value = markdown(hover(&ctx, Position::new(3, 7)).unwrap());
        assert!(value.starts_with("**scope** `core`"));
        assert!(value.contains("Declared in `scope.yaml` on line 2"));
    }

    #[test]
    fn test_hover_on_malformed_document_is_none() {
        let ctx = provider_context("scope.yaml", "name: test\n  invalid: indentation");
        assert!(hover(&ctx, Position::new(0, 2)).is_none());
    }

    #[test]
    fn test_hover_disabled() {
        let mut ctx = provider_context("decisions.yaml", "decisions: []\n");
        let mut settings = (*ctx.settings).clone();
        settings.providers.hover = false;
        ctx.settings = std::sync::Arc::new(settings);
        assert!(hover(&ctx, Position::new(0, 3)).is_none());
    }
}
