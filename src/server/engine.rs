//! Session state shared by every handler.
//!
//! The engine owns the open documents, the document cache, the workspace index
//! and telemetry. It knows nothing about the transport: lifecycle methods
//! return the diagnostics to publish and the backend sends them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tower_lsp::lsp_types::{
    Diagnostic, FileChangeType, FileEvent, InitializeParams, InitializeResult, ServerInfo, Url,
};
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, DocumentCache};
use crate::cancel::RequestTracker;
use crate::config::{ConfigError, Settings};
use crate::context::ProviderContext;
use crate::diagnostics;
use crate::document::{Document, DocumentKind};
use crate::semantic_tokens::SemanticTokenizer;
use crate::telemetry::Telemetry;
use crate::workspace::{IndexError, WorkspaceIndex, WorkspaceStats};

use super::capabilities::NegotiatedCapabilities;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Exited,
}

/// Diagnostics to push for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub uri: Url,
    pub diagnostics: Vec<Diagnostic>,
    pub version: Option<i32>,
}

#[derive(Debug)]
pub struct Engine {
    state: RwLock<SessionState>,
    settings: RwLock<Arc<Settings>>,
    capabilities: RwLock<NegotiatedCapabilities>,
    config_errors: RwLock<Vec<ConfigError>>,
    documents: RwLock<HashMap<Url, Arc<Document>>>,
    cache: DocumentCache,
    index: WorkspaceIndex,
    tokenizer: Arc<SemanticTokenizer>,
    telemetry: Telemetry,
    requests: RequestTracker,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

fn workspace_roots(params: &InitializeParams) -> Vec<PathBuf> {
    let folders: Vec<PathBuf> = params
        .workspace_folders
        .iter()
        .flatten()
        .filter_map(|folder| folder.uri.to_file_path().ok())
        .collect();
    if !folders.is_empty() {
        return folders;
    }
    #[allow(deprecated)] // `root_uri` is superseded by `workspace_folders`
    let root = params.root_uri.as_ref().and_then(|uri| uri.to_file_path().ok());
    root.or_else(|| std::env::current_dir().ok())
        .into_iter()
        .collect()
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Engine {
            state: RwLock::new(SessionState::Uninitialized),
            telemetry: Telemetry::new(&settings.telemetry),
            settings: RwLock::new(Arc::new(settings)),
            capabilities: RwLock::new(NegotiatedCapabilities::default()),
            config_errors: RwLock::new(Vec::new()),
            documents: RwLock::new(HashMap::new()),
            cache: DocumentCache::new(),
            index: WorkspaceIndex::default(),
            tokenizer: Arc::new(SemanticTokenizer::new()),
            requests: RequestTracker::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.read().clone()
    }

    pub fn capabilities(&self) -> NegotiatedCapabilities {
        *self.capabilities.read()
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    pub fn index(&self) -> &WorkspaceIndex {
        &self.index
    }

    pub fn tokenizer(&self) -> Arc<SemanticTokenizer> {
        self.tokenizer.clone()
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Problems found in the configuration files, reported once the session is up.
    pub fn take_config_errors(&self) -> Vec<ConfigError> {
        std::mem::take(&mut *self.config_errors.write())
    }

    pub fn document(&self, uri: &Url) -> Option<Arc<Document>> {
        self.documents.read().get(uri).cloned()
    }

    pub fn open_documents(&self) -> Vec<Url> {
        self.documents.read().keys().cloned().collect()
    }

    pub fn initialize(&self, params: &InitializeParams) -> InitializeResult {
        *self.state.write() = SessionState::Initializing;

        let roots = workspace_roots(params);
        let config_root = roots.first().cloned().unwrap_or_default();
        let settings = match Settings::new(&config_root, &params.capabilities) {
            Ok((settings, errors)) => {
                *self.config_errors.write() = errors;
                settings
            }
            Err(err) => {
                self.telemetry
                    .errors
                    .record("failed to load configuration", err, Some("initialize"));
                Settings::default()
            }
        };

        let negotiated = NegotiatedCapabilities::negotiate(&params.capabilities, &settings);
        self.telemetry.apply(&settings.telemetry);
        *self.settings.write() = Arc::new(settings);
        *self.capabilities.write() = negotiated;
        self.index.set_roots(roots);
        info!(?negotiated, "capabilities negotiated");

        InitializeResult {
            capabilities: negotiated.server_capabilities(),
            server_info: Some(ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        }
    }

    pub fn initialized(&self) {
        *self.state.write() = SessionState::Ready;
        info!("session ready");
    }

    pub fn shutdown(&self) {
        *self.state.write() = SessionState::ShuttingDown;
        for uri in self.open_documents() {
            self.requests.cancel_all(&uri);
        }
        info!("session shutting down");
    }

    /// Ends the session and drops every open document.
    ///
    /// Returns false when the client exits without a prior shutdown.
    pub fn exit(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.write(), SessionState::Exited);
        let documents = std::mem::take(&mut *self.documents.write());
        for uri in documents.keys() {
            self.requests.cancel_all(uri);
        }
        self.cache.clear();
        let clean = previous == SessionState::ShuttingDown;
        info!(clean, "session exited");
        clean
    }

    fn compute(&self, document: &Document) -> Arc<CacheEntry> {
        let settings = self.settings();
        let snapshot = self.index.snapshot();
        let (parse_result, validation) = diagnostics::analyze(
            &document.text,
            &document.uri,
            snapshot.as_ref(),
            &settings.diagnostics,
        );
        Arc::new(CacheEntry {
            parse_result,
            validation,
            version: document.version,
            last_modified: document.last_modified,
        })
    }

    /// Parses and validates `document`, storing the result for its version.
    fn analyze(&self, document: &Document) -> Arc<CacheEntry> {
        let entry = self.compute(document);
        self.cache.set(&document.uri, entry.clone());
        entry
    }

    /// Like [`Engine::analyze`], but the entry is only stored while
    /// `document` is still the open version.
    fn analyze_if_current(&self, document: &Arc<Document>) -> Arc<CacheEntry> {
        let entry = self.compute(document);
        // Held across the check and the write so `store` cannot slip in between.
        let documents = self.documents.read();
        if documents
            .get(&document.uri)
            .is_some_and(|open| Arc::ptr_eq(open, document))
        {
            self.cache.set(&document.uri, entry.clone());
        } else {
            debug!(uri = %document.uri, version = document.version, "not caching analysis of superseded text");
        }
        entry
    }

    /// Whether `document` is still the text the client has open.
    pub fn is_current(&self, document: &Arc<Document>) -> bool {
        self.documents
            .read()
            .get(&document.uri)
            .is_some_and(|open| Arc::ptr_eq(open, document))
    }

    fn publication(&self, document: &Document, entry: &CacheEntry) -> Publication {
        Publication {
            uri: document.uri.clone(),
            diagnostics: diagnostics::publishable(&entry.validation, &self.settings().diagnostics),
            version: Some(document.version),
        }
    }

    /// Replaces the document text and re-validates. Files that are not Rhema
    /// documents are ignored.
    fn store(&self, uri: Url, version: i32, text: String) -> Option<Publication> {
        let Some(kind) = DocumentKind::classify_uri(&uri) else {
            debug!(%uri, "ignoring file that is not a Rhema document");
            return None;
        };
        let document = Arc::new(Document::new(uri.clone(), version, text, kind));
        self.documents.write().insert(uri.clone(), document.clone());
        // After the insert: a request registered later reads the new text.
        let cancelled = self.requests.cancel_all(&uri);
        if cancelled > 0 {
            debug!(%uri, cancelled, "cancelled requests for superseded text");
        }
        let entry = self.analyze(&document);
        Some(self.publication(&document, &entry))
    }

    pub fn open(&self, uri: Url, version: i32, text: String) -> Option<Publication> {
        self.store(uri, version, text)
    }

    pub fn change(&self, uri: Url, version: i32, text: String) -> Option<Publication> {
        self.store(uri, version, text)
    }

    /// Re-validates on save; the saved text replaces ours when the client sends it.
    pub fn save(&self, uri: Url, text: Option<String>) -> Option<Publication> {
        let current = self.document(&uri)?;
        let text = text.unwrap_or_else(|| current.text.clone());
        self.store(uri, current.version, text)
    }

    /// Forgets an open document. The workspace index keeps its entry.
    pub fn close(&self, uri: &Url) -> Option<Publication> {
        self.requests.cancel_all(uri);
        self.tokenizer.forget(uri);
        self.cache.remove(uri);
        self.documents.write().remove(uri)?;
        Some(Publication {
            uri: uri.clone(),
            diagnostics: Vec::new(),
            version: None,
        })
    }

    /// Re-validates every open document, e.g. after the index changed.
    pub fn revalidate_open(&self) -> Vec<Publication> {
        let documents: Vec<Arc<Document>> = self.documents.read().values().cloned().collect();
        documents
            .iter()
            .map(|document| {
                let entry = self.analyze(document);
                self.publication(document, &entry)
            })
            .collect()
    }

    /// Everything a provider needs to answer a request about `uri`.
    ///
    /// A missing or stale cache entry is recomputed on the spot.
    pub fn context(&self, uri: &Url) -> Option<ProviderContext> {
        // Registered before the document is read, so an edit landing in
        // between cancels this request.
        let cancel = self.requests.begin(uri);
        let document = self.document(uri)?;
        let entry = match self.cache.get_current(uri, document.version) {
            Some(entry) => entry,
            None => {
                debug!(%uri, "cache miss, analyzing on demand");
                self.analyze_if_current(&document)
            }
        };
        Some(ProviderContext {
            entry,
            index: self.index.snapshot(),
            settings: self.settings(),
            open_documents: self.documents.read().clone(),
            cancel,
            document,
        })
    }

    /// Full index rebuild. Open documents are re-validated against the new index.
    pub async fn reindex(&self) -> Result<(WorkspaceStats, Vec<Publication>), IndexError> {
        let settings = self.settings();
        if !settings.index.enabled {
            debug!("workspace indexing disabled");
            return Ok((self.index.get_workspace_stats(), Vec::new()));
        }
        let stats = self.index.index(&settings.index).await?;
        Ok((stats, self.revalidate_open()))
    }

    /// Applies file-watch events to the index.
    pub async fn files_changed(&self, events: &[FileEvent]) -> Result<Vec<Publication>, IndexError> {
        let settings = self.settings();
        if !settings.index.enabled {
            return Ok(Vec::new());
        }
        let (mut changed, mut removed) = (Vec::new(), Vec::new());
        for event in events {
            let Ok(path) = event.uri.to_file_path() else {
                continue;
            };
            if event.typ == FileChangeType::DELETED {
                removed.push(path);
            } else {
                changed.push(path);
            }
        }
        if changed.is_empty() && removed.is_empty() {
            return Ok(Vec::new());
        }
        self.index
            .refresh_files(changed, removed, &settings.index)
            .await?;
        Ok(self.revalidate_open())
    }

    pub fn workspace_folders_changed(&self, added: Vec<PathBuf>, removed: Vec<PathBuf>) {
        for root in removed {
            self.index.remove_root(&root);
        }
        for root in added {
            self.index.add_root(root);
        }
    }

    /// Applies `workspace/didChangeConfiguration`. Invalid options are
    /// reported and skipped.
    pub fn update_settings(&self, value: &serde_json::Value) -> anyhow::Result<Vec<ConfigError>> {
        let (settings, errors) = self.settings().from_client_value(value)?;
        for error in &errors {
            warn!("configuration: {error}");
        }
        self.telemetry.apply(&settings.telemetry);
        *self.settings.write() = Arc::new(settings);
        Ok(errors)
    }

    /// Drops every cached analysis and token result.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.tokenizer.clear();
        info!(at = %Utc::now(), "caches cleared");
    }
}
