use std::collections::HashMap;
use std::sync::Arc;

use tower_lsp::lsp_types::Url;

use crate::cache::CacheEntry;
use crate::cancel::CancelFlag;
use crate::config::Settings;
use crate::document::{Document, RhemaDocument};
use crate::workspace::IndexSnapshot;

/// Everything a query provider may look at, captured when the request
/// arrives. Providers run on the blocking pool and never touch engine state.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub document: Arc<Document>,
    pub entry: Arc<CacheEntry>,
    pub index: Arc<IndexSnapshot>,
    pub settings: Arc<Settings>,
    pub open_documents: HashMap<Url, Arc<Document>>,
    pub cancel: CancelFlag,
}

impl ProviderContext {
    pub fn uri(&self) -> &Url {
        &self.document.uri
    }

    pub fn text(&self) -> &str {
        &self.document.text
    }

    /// The parsed tree, if the document parsed.
    pub fn tree(&self) -> Option<&RhemaDocument> {
        self.entry.parse_result.document()
    }

    /// Current text of every open document, for searches that must prefer
    /// unsaved editor contents over what the index read from disk.
    pub fn open_texts(&self) -> HashMap<Url, String> {
        self.open_documents
            .iter()
            .map(|(uri, document)| (uri.clone(), document.text.clone()))
            .collect()
    }
}
