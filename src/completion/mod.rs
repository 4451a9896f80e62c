use tower_lsp::lsp_types::{
    CompletionItem, CompletionItemKind, CompletionList, CompletionResponse, CompletionTextEdit,
    Documentation, MarkupContent, MarkupKind, Position, Range, TextEdit,
};

use crate::{
    context::ProviderContext,
    document::{outline::CursorContext, Layout, PathSegment, RhemaDocument, Section},
};

use self::key_completer::KeyCompleter;
use self::reference_completer::{IdReferenceCompleter, ScopeNameCompleter};
use self::value_completer::EnumValueCompleter;

mod key_completer;
mod reference_completer;
mod value_completer;

const MAX_ITEMS: usize = 50;

#[derive(Clone, Copy)]
pub struct Context<'a> {
    provider: &'a ProviderContext,
    document: &'a RhemaDocument,
    cursor: &'a CursorContext,
    position: Position,
}

impl<'a> Context<'a> {
    /// Section the cursor is in, judged from the first path segment.
    fn section(&self) -> Option<Section> {
        if self.document.layout == Layout::FlatScope {
            return Some(Section::Scope);
        }
        self.cursor
            .path
            .first()
            .and_then(PathSegment::as_key)
            .and_then(Section::from_key)
    }

    fn path_keys(&self) -> impl Iterator<Item = &'a str> {
        self.cursor.path.iter().filter_map(PathSegment::as_key)
    }

    /// The key whose list the cursor is an item of, or whose value it is in.
    fn owning_key(&self) -> Option<&'a str> {
        match &self.cursor.value_of {
            Some(key) => Some(key.as_str()),
            None if self.cursor.item_scalar => {
                let mut keys = self.cursor.path.iter().rev();
                // path ends with the item's own index
                keys.next();
                keys.next().and_then(PathSegment::as_key)
            }
            None => None,
        }
    }

    /// Builds an item that replaces the word typed so far.
    fn item(
        &self,
        label: &str,
        kind: CompletionItemKind,
        detail: Option<String>,
        documentation: Option<&str>,
    ) -> CompletionItem {
        let typed = self.cursor.prefix.chars().count() as u32;
        let range = Range {
            start: Position {
                line: self.position.line,
                character: self.position.character.saturating_sub(typed),
            },
            end: self.position,
        };
        CompletionItem {
            label: label.to_string(),
            kind: Some(kind),
            detail,
            documentation: documentation.map(|doc| {
                Documentation::MarkupContent(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: doc.to_string(),
                })
            }),
            filter_text: Some(label.to_string()),
            text_edit: Some(CompletionTextEdit::Edit(TextEdit {
                range,
                new_text: label.to_string(),
            })),
            ..Default::default()
        }
    }

    fn matches_prefix(&self, label: &str) -> bool {
        label.starts_with(self.cursor.prefix.as_str())
    }
}

pub trait Completer<'a>: Sized {
    fn construct(context: Context<'a>) -> Option<Self>;

    fn completions(&self) -> Vec<CompletionItem>;
}

pub fn get_completions(context: &ProviderContext, position: Position) -> CompletionResponse {
    if !context.settings.providers.completion {
        return CompletionResponse::Array(Vec::new());
    }
    let Some(document) = context.tree() else {
        return CompletionResponse::Array(Vec::new());
    };
    let cursor = document.outline.cursor_context(context.text(), position);
    let completion_context = Context {
        provider: context,
        document,
        cursor: &cursor,
        position,
    };

    run_completer::<ScopeNameCompleter>(completion_context)
        .or_else(|| run_completer::<IdReferenceCompleter>(completion_context))
        .or_else(|| run_completer::<EnumValueCompleter>(completion_context))
        .or_else(|| run_completer::<KeyCompleter>(completion_context))
        .unwrap_or(CompletionResponse::Array(Vec::new()))
}

fn run_completer<'a, T: Completer<'a>>(context: Context<'a>) -> Option<CompletionResponse> {
    let completer = T::construct(context)?;
    let items = completer
        .completions()
        .into_iter()
        .take(MAX_ITEMS)
        .collect::<Vec<CompletionItem>>();

    Some(CompletionResponse::List(CompletionList {
        is_incomplete: false,
        items,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::provider_context;

    fn labels(response: CompletionResponse) -> Vec<String> {
        match response {
            CompletionResponse::Array(items) => items,
            CompletionResponse::List(list) => list.items,
        }
        .into_iter()
        .map(|item| item.label)
        .collect()
    }

    #[test]
    fn test_status_values() {
        let text = "todos:\n  - id: a\n    title: A\n    status: \n";
        let ctx = provider_context("todos.yaml", text);
        let items = labels(get_completions(&ctx, Position::new(3, 12)));
        assert_eq!(items, vec!["pending", "in_progress", "blocked", "completed", "cancelled"]);
    }

    #[test]
    fn test_record_keys_exclude_present_ones() {
        let text = "todos:\n  - id: a\n    title: A\n    \n";
        let ctx = provider_context("todos.yaml", text);
        let items = labels(get_completions(&ctx, Position::new(3, 4)));
        assert!(items.contains(&"status".to_string()));
        assert!(items.contains(&"depends_on".to_string()));
        assert!(!items.contains(&"id".to_string()));
        assert!(!items.contains(&"title".to_string()));
    }

    #[test]
    fn test_root_offers_missing_sections() {
        let text = "todos: []\n\n";
        let ctx = provider_context("project.rhema.yaml", text);
        let items = labels(get_completions(&ctx, Position::new(1, 0)));
        assert!(items.contains(&"decisions".to_string()));
        assert!(!items.contains(&"todos".to_string()));
    }

    #[test]
    fn test_depends_on_offers_other_todo_ids() {
        let text = "todos:\n  - id: a\n    title: A\n  - id: b\n    title: B\n    depends_on:\n      - \n";
        let ctx = provider_context("todos.yaml", text);
        let items = labels(get_completions(&ctx, Position::new(6, 8)));
        assert_eq!(items, vec!["a"]);
    }

    #[test]
    fn test_malformed_document_gives_empty_array() {
        let ctx = provider_context("scope.yaml", "name: test\n  invalid: indentation");
        assert_eq!(
            get_completions(&ctx, Position::new(0, 2)),
            CompletionResponse::Array(Vec::new())
        );
    }
}
