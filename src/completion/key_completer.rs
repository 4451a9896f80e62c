//! Mapping keys allowed at the cursor: sections at the root, record fields
//! inside a record, scope and dependency fields inside the scope header.

use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind};

use crate::document::{Layout, PathSegment, Section};
use crate::schema;

use super::{Completer, Context};

pub struct KeyCompleter<'a> {
    context: Context<'a>,
    candidates: Vec<(&'static str, Option<&'static str>)>,
    kind: CompletionItemKind,
    detail: &'static str,
}

impl<'a> KeyCompleter<'a> {
    /// Keys already written under the node at the cursor path.
    fn present_keys(context: &Context<'a>) -> Vec<&'a str> {
        let outline = &context.document.outline;
        if context.cursor.path.is_empty() {
            return outline.roots().filter_map(|node| node.key.as_deref()).collect();
        }
        let Some(node) = outline.locate(&context.cursor.path) else {
            return Vec::new();
        };
        node.children
            .iter()
            .filter_map(|&child| outline.node(child).key.as_deref())
            .collect()
    }
}

impl<'a> Completer<'a> for KeyCompleter<'a> {
    fn construct(context: Context<'a>) -> Option<Self> {
        if context.cursor.value_of.is_some() || context.cursor.item_scalar {
            return None;
        }
        let flat = context.document.layout == Layout::FlatScope;
        let path = context.cursor.path.as_slice();

        let (candidates, kind, detail): (Vec<(&'static str, Option<&'static str>)>, _, _) = match path {
            [] if flat => (
                schema::record_keys(Section::Scope)
                    .into_iter()
                    .map(|key| (key, schema::field_description(Section::Scope, key)))
                    .collect(),
                CompletionItemKind::FIELD,
                "scope field",
            ),
            [] => (
                schema::section_keys()
                    .into_iter()
                    .map(|key| (key, schema::section_description(key)))
                    .collect(),
                CompletionItemKind::MODULE,
                "section",
            ),
            [PathSegment::Key(key)] if !flat && key == "scope" => (
                schema::record_keys(Section::Scope)
                    .into_iter()
                    .map(|key| (key, schema::field_description(Section::Scope, key)))
                    .collect(),
                CompletionItemKind::FIELD,
                "scope field",
            ),
            [.., PathSegment::Key(key), PathSegment::Index(_)] if key == "dependencies" => (
                schema::dependency_keys().into_iter().map(|key| (key, None)).collect(),
                CompletionItemKind::FIELD,
                "dependency field",
            ),
            [PathSegment::Key(key), PathSegment::Index(_)] if !flat => {
                let section = Section::from_key(key).filter(Section::is_list)?;
                (
                    schema::record_keys(section)
                        .into_iter()
                        .map(|key| (key, schema::field_description(section, key)))
                        .collect(),
                    CompletionItemKind::FIELD,
                    section.record_label(),
                )
            }
            _ => return None,
        };

        let present = Self::present_keys(&context);
        let candidates = candidates
            .into_iter()
            .filter(|(key, _)| !present.contains(key))
            .collect::<Vec<_>>();

        Some(KeyCompleter {
            context,
            candidates,
            kind,
            detail,
        })
    }

    fn completions(&self) -> Vec<CompletionItem> {
        self.candidates
            .iter()
            .filter(|(key, _)| self.context.matches_prefix(key))
            .map(|(key, doc)| {
                self.context
                    .item(key, self.kind, Some(self.detail.to_string()), *doc)
            })
            .collect()
    }
}
