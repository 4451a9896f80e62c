use tower_lsp::lsp_types::{GotoDefinitionResponse, Location, Position};

use crate::context::ProviderContext;
use crate::resolve;

/// Declaration of the name under the cursor.
///
/// A declaration in the same document wins; otherwise every declaration the
/// workspace index knows of in other files is returned.
pub fn goto_definition(context: &ProviderContext, position: Position) -> Option<GotoDefinitionResponse> {
    let word = resolve::word_at(context.text(), position)?;

    if let Some(range) = resolve::find_local_definition(&word.value, context.text(), position) {
        return Some(GotoDefinitionResponse::Scalar(Location::new(
            context.uri().clone(),
            range,
        )));
    }

    let mut locations = context
        .index
        .declarations(&word.value)
        .iter()
        .filter(|(uri, _)| uri != context.uri())
        .map(|(uri, range)| Location::new(uri.clone(), *range))
        .collect::<Vec<_>>();

    match locations.len() {
        0 => None,
        1 => locations.pop().map(GotoDefinitionResponse::Scalar),
        _ => Some(GotoDefinitionResponse::Array(locations)),
    }
}
