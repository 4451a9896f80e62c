use tower_lsp::lsp_types::{CompletionItem, CompletionItemKind};

use crate::document::PathSegment;
use crate::schema;

use super::{Completer, Context};

/// Values of enum-typed fields such as `status`, `priority` or `type`.
pub struct EnumValueCompleter<'a> {
    context: Context<'a>,
    key: &'a str,
    values: Vec<&'static str>,
}

impl<'a> Completer<'a> for EnumValueCompleter<'a> {
    fn construct(context: Context<'a>) -> Option<Self> {
        let key = context.cursor.value_of.as_deref()?;
        // Only direct fields of a record or of the scope header carry enums.
        let direct = match context.cursor.path.as_slice() {
            [.., PathSegment::Index(_), PathSegment::Key(_)] => true,
            [PathSegment::Key(scope), PathSegment::Key(_)] => scope == "scope",
            [PathSegment::Key(_)] => true,
            _ => false,
        };
        if !direct {
            return None;
        }
        let values = schema::enum_values(context.section()?, key);
        if values.is_empty() {
            return None;
        }
        Some(EnumValueCompleter {
            context,
            key,
            values,
        })
    }

    fn completions(&self) -> Vec<CompletionItem> {
        self.values
            .iter()
            .filter(|value| self.context.matches_prefix(value))
            .map(|value| {
                self.context.item(
                    value,
                    CompletionItemKind::ENUM_MEMBER,
                    Some(format!("{} value", self.key)),
                    None,
                )
            })
            .collect()
    }
}
