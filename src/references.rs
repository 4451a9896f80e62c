use tower_lsp::lsp_types::{Location, Position};

use crate::context::ProviderContext;
use crate::resolve;

/// Every occurrence of the name under the cursor across the workspace.
///
/// Open documents are searched with their editor text, so unsaved edits are
/// reflected. With `include_declaration` unset, declaring occurrences known to
/// the index or to the current document are left out.
pub fn references(
    context: &ProviderContext,
    position: Position,
    include_declaration: bool,
) -> Option<Vec<Location>> {
    let word = resolve::word_at(context.text(), position)?;

    let mut overrides = context.open_texts();
    overrides.insert(context.uri().clone(), context.text().to_string());
    let locations = context
        .index
        .find_references(&word.value, &overrides, Some(&context.cancel));

    if include_declaration {
        return Some(locations);
    }

    let local_declarations = context
        .tree()
        .map(|document| {
            document
                .symbols()
                .into_iter()
                .filter(|symbol| symbol.name == word.value)
                .map(|symbol| Location::new(context.uri().clone(), symbol.range))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let indexed = context.index.declarations(&word.value);

    Some(
        locations
            .into_iter()
            .filter(|location| {
                !local_declarations.contains(location)
                    && !indexed
                        .iter()
                        .any(|(uri, range)| *uri == location.uri && *range == location.range)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, DocumentKind};
    use crate::test_utils::{provider_context_with_index, test_uri};
    use std::sync::Arc;
    use tower_lsp::lsp_types::Range;

    const API: &str = "scope:\n  name: api\n  dependencies:\n    - core\n";
    const CORE: &str = "scope:\n  name: core\n";
    const WEB: &str = "scope:\n  name: web\n  dependencies: [core, api]\n";

    #[test]
    fn test_references_across_files() {
        let ctx = provider_context_with_index(
            "api/scope.yaml",
            API,
            &[("core/scope.yaml", CORE), ("web/scope.yaml", WEB)],
        );
        let locations = references(&ctx, Position::new(3, 7), true).unwrap();
        let uris: Vec<_> = locations.iter().map(|l| l.uri.clone()).collect();
        assert_eq!(
            uris,
            vec![
                test_uri("api/scope.yaml"),
                test_uri("core/scope.yaml"),
                test_uri("web/scope.yaml"),
            ]
        );
    }

    #[test]
    fn test_declarations_can_be_excluded() {
        let ctx = provider_context_with_index(
            "api/scope.yaml",
            API,
            &[("core/scope.yaml", CORE), ("web/scope.yaml", WEB)],
        );
        let locations = references(&ctx, Position::new(3, 7), false).unwrap();
        assert!(locations.iter().all(|l| l.uri != test_uri("core/scope.yaml")));
        assert_eq!(locations.len(), 2);
    }

    #[test]
    fn test_open_text_overrides_indexed_text() {
        let mut ctx = provider_context_with_index("core/scope.yaml", CORE, &[("api/scope.yaml", API)]);
        let edited = Document::new(
            test_uri("api/scope.yaml"),
            2,
            "scope:\n  name: api\n".to_string(),
            DocumentKind::Scope,
        );
        ctx.open_documents.insert(edited.uri.clone(), Arc::new(edited));

        let locations = references(&ctx, Position::new(1, 9), true).unwrap();
        assert_eq!(
            locations,
            vec![Location::new(
                test_uri("core/scope.yaml"),
                Range::new(Position::new(1, 8), Position::new(1, 12)),
            )]
        );
    }

    #[test]
    fn test_cancelled_search_is_empty() {
        let ctx = provider_context_with_index("api/scope.yaml", API, &[("core/scope.yaml", CORE)]);
        ctx.cancel.cancel();
        assert_eq!(references(&ctx, Position::new(3, 7), true), Some(Vec::new()));
    }

    #[test]
    fn test_first_line_declaration_with_byte_order_mark() {
        let core = "\u{feff}name: core\n";
        let ctx = provider_context_with_index("core/scope.yaml", core, &[("api/scope.yaml", API)]);
        let declaration = Location::new(
            test_uri("core/scope.yaml"),
            Range::new(Position::new(0, 7), Position::new(0, 11)),
        );
        assert_eq!(ctx.tree().unwrap().symbols()[0].range, declaration.range);

        let all = references(&ctx, Position::new(0, 8), true).unwrap();
        assert!(all.contains(&declaration));

        let without = references(&ctx, Position::new(0, 8), false).unwrap();
        assert_eq!(
            without,
            vec![Location::new(
                test_uri("api/scope.yaml"),
                Range::new(Position::new(3, 6), Position::new(3, 10)),
            )]
        );
    }
}
