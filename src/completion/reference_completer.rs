//! Completion of names that point at other entities: scope names in
//! `dependencies`, record ids in `depends_on` and `superseded_by`.

use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind};

use crate::document::PathSegment;

use super::{Completer, Context};

pub struct ScopeNameCompleter<'a> {
    context: Context<'a>,
    names: Vec<&'a str>,
}

impl<'a> Completer<'a> for ScopeNameCompleter<'a> {
    fn construct(context: Context<'a>) -> Option<Self> {
        let in_dependencies = context.path_keys().any(|key| key == "dependencies");
        let applies = match context.owning_key() {
            Some("dependencies") => true,
            Some("name") => in_dependencies,
            _ => false,
        };
        if !applies {
            return None;
        }

        let own = context.document.scope_name();
        let listed = context
            .document
            .scope
            .as_ref()
            .map(|scope| {
                scope
                    .dependencies
                    .iter()
                    .map(|dependency| dependency.name.as_str())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let names = context
            .provider
            .index
            .scope_names()
            .into_iter()
            .filter(|name| Some(*name) != own && !listed.contains(name))
            .collect();

        Some(ScopeNameCompleter { context, names })
    }

    fn completions(&self) -> Vec<CompletionItem> {
        self.names
            .iter()
            .filter(|name| self.context.matches_prefix(name))
            .map(|name| {
                let detail = self
                    .context
                    .provider
                    .index
                    .declarations(name)
                    .first()
                    .map(|(uri, _)| uri.path().to_string());
                self.context
                    .item(name, CompletionItemKind::MODULE, detail, None)
            })
            .collect()
    }
}

/// Ids of sibling records of the same section.
pub struct IdReferenceCompleter<'a> {
    context: Context<'a>,
    ids: Vec<(&'a str, Option<&'a str>)>,
}

impl<'a> Completer<'a> for IdReferenceCompleter<'a> {
    fn construct(context: Context<'a>) -> Option<Self> {
        if !matches!(context.owning_key(), Some("depends_on" | "superseded_by")) {
            return None;
        }
        let section = context.section()?;
        let current = match context.cursor.path.get(1) {
            Some(PathSegment::Index(index)) => Some(*index),
            _ => None,
        };
        let records = &context.document.section(section)?.records;

        let listed: Vec<&str> = current
            .and_then(|index| records.iter().find(|record| record.index == index))
            .and_then(|record| record.field("depends_on"))
            .map(|field| field.items.iter().map(|item| item.value.as_str()).collect())
            .unwrap_or_default();

        let ids = records
            .iter()
            .filter(|record| Some(record.index) != current)
            .filter_map(|record| Some((record.id()?, record.str_field("title"))))
            .filter(|(id, _)| !listed.contains(id))
            .collect();

        Some(IdReferenceCompleter { context, ids })
    }

    fn completions(&self) -> Vec<CompletionItem> {
        self.ids
            .iter()
            .filter(|(id, _)| self.context.matches_prefix(id))
            .map(|(id, title)| {
                self.context.item(
                    id,
                    CompletionItemKind::REFERENCE,
                    title.map(str::to_string),
                    None,
                )
            })
            .collect()
    }
}
