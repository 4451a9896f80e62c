//! Workspace-wide symbol table and dependency graph.
//!
//! The index is built by scanning the workspace roots, independent of which
//! documents the editor has open. Readers work on an immutable
//! [`IndexSnapshot`]; rebuilds and refreshes construct a new snapshot and swap
//! it in atomically, so a half-built index is never observable.

mod graph;
pub mod scan;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use nucleo_matcher::{
    pattern::{self, Normalization},
    Matcher,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tower_lsp::lsp_types::{Location, Range, SymbolKind, Url};
use tracing::{debug, info};

pub use graph::DependencyGraph;
pub use scan::IndexError;

use crate::cancel::CancelFlag;
use crate::config::{Case, IndexSettings};
use crate::document::{parse, Dependency, DocumentKind, Symbol};
use crate::resolve;
use crate::validator::{CycleMember, ScopeResolver};

/// What the index keeps about one file.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub uri: Url,
    pub path: PathBuf,
    pub kind: DocumentKind,
    pub text: Arc<str>,
    pub symbols: Vec<Symbol>,
    pub scope_name: Option<String>,
    pub scope_range: Range,
    pub dependencies: Vec<Dependency>,
    pub parsed: bool,
}

impl IndexedFile {
    pub fn new(uri: Url, path: PathBuf, kind: DocumentKind, text: String) -> Self {
        let result = parse(&text, &uri);
        let (symbols, scope_name, scope_range, dependencies) = match result.document() {
            Some(document) => {
                let scope = document.scope.as_ref();
                (
                    document.symbols(),
                    document.scope_name().map(str::to_string),
                    scope
                        .and_then(|s| s.name.as_ref().map(|n| n.range))
                        .unwrap_or_default(),
                    scope.map(|s| s.dependencies.clone()).unwrap_or_default(),
                )
            }
            None => (Vec::new(), None, Range::default(), Vec::new()),
        };
        IndexedFile {
            uri,
            path,
            kind,
            text: text.into(),
            symbols,
            scope_name,
            scope_range,
            dependencies,
            parsed: result.is_success(),
        }
    }

    pub fn is_scope(&self) -> bool {
        self.scope_name.is_some() || !self.dependencies.is_empty()
    }
}

/// A symbol found by a workspace-wide query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolMatch {
    pub uri: Url,
    pub symbol: Symbol,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStats {
    pub total_files: usize,
    pub scopes: usize,
    pub total_symbols: usize,
    pub unparsable_files: usize,
    pub dependency_edges: usize,
    pub dependency_cycles: usize,
    pub skipped_files: usize,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_ms: Option<u64>,
}

/// An immutable view of the index.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    files: HashMap<Url, IndexedFile>,
    by_name: HashMap<String, Vec<(Url, Range)>>,
    graph: DependencyGraph,
    ready: bool,
    skipped: usize,
    built_at: Option<DateTime<Utc>>,
    build_ms: Option<u64>,
}

impl IndexSnapshot {
    pub(crate) fn from_files(files: HashMap<Url, IndexedFile>, skipped: usize) -> Self {
        let mut by_name: HashMap<String, Vec<(Url, Range)>> = HashMap::new();
        for file in files.values() {
            for symbol in file.symbols.iter().filter(|s| s.kind != SymbolKind::PACKAGE) {
                by_name
                    .entry(symbol.name.clone())
                    .or_default()
                    .push((file.uri.clone(), symbol.range));
            }
        }
        for entries in by_name.values_mut() {
            entries.sort_by(|a, b| {
                (a.0.as_str(), a.1.start.line, a.1.start.character).cmp(&(
                    b.0.as_str(),
                    b.1.start.line,
                    b.1.start.character,
                ))
            });
        }
        let graph = DependencyGraph::build(files.values());
        IndexSnapshot {
            files,
            by_name,
            graph,
            ready: true,
            skipped,
            built_at: Some(Utc::now()),
            build_ms: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn file(&self, uri: &Url) -> Option<&IndexedFile> {
        self.files.get(uri)
    }

    pub fn files(&self) -> impl Iterator<Item = &IndexedFile> {
        self.files.values()
    }

    /// Declarations of exactly `name`, sorted by location.
    pub fn declarations(&self, name: &str) -> &[(Url, Range)] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn scope_names(&self) -> Vec<&str> {
        self.files
            .values()
            .filter_map(|file| file.scope_name.as_deref())
            .sorted()
            .dedup()
            .collect()
    }

    /// Fuzzy search over every symbol name. An empty query matches everything.
    pub fn find_symbols(&self, query: &str, case: Case) -> Vec<SymbolMatch> {
        let all = self
            .files
            .values()
            .flat_map(|file| {
                file.symbols.iter().map(|symbol| SymbolMatch {
                    uri: file.uri.clone(),
                    symbol: symbol.clone(),
                })
            })
            .sorted_by(|a, b| {
                (a.symbol.name.as_str(), a.uri.as_str()).cmp(&(b.symbol.name.as_str(), b.uri.as_str()))
            });

        if query.trim().is_empty() {
            return all.collect();
        }

        let case_matching = match case {
            Case::Ignore => pattern::CaseMatching::Ignore,
            Case::Smart => pattern::CaseMatching::Smart,
            Case::Respect => pattern::CaseMatching::Respect,
        };
        let mut matcher = Matcher::new(nucleo_matcher::Config::DEFAULT);
        let pattern = pattern::Pattern::parse(query, case_matching, Normalization::Smart);
        let mut buf = Vec::new();

        all.map(|found| {
            let score = pattern
                .score(
                    nucleo_matcher::Utf32Str::new(found.symbol.name.as_str(), &mut buf),
                    &mut matcher,
                )
                .unwrap_or_default();
            (score, found)
        })
        .filter(|(score, _)| *score > 0)
        // Stable sort keeps name order among equal scores.
        .sorted_by(|(a, _), (b, _)| Ord::cmp(b, a))
        .map(|(_score, found)| found)
        .collect_vec()
    }

    /// Every occurrence of `name` across the workspace.
    ///
    /// `overrides` supplies newer text for files the editor has open.
    pub fn find_references(
        &self,
        name: &str,
        overrides: &HashMap<Url, String>,
        cancel: Option<&CancelFlag>,
    ) -> Vec<Location> {
        let mut uris: Vec<&Url> = self.files.keys().chain(overrides.keys()).collect();
        uris.sort();
        uris.dedup();

        let mut locations = Vec::new();
        for uri in uris {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                debug!("reference search cancelled");
                return Vec::new();
            }
            let text = match overrides.get(uri) {
                Some(text) => text.as_str(),
                None => match self.files.get(uri) {
                    Some(file) => file.text.as_ref(),
                    None => continue,
                },
            };
            locations.extend(resolve::find_local_references(name, text, uri));
        }
        locations
    }

    pub fn get_dependencies(&self, uri: &Url) -> Vec<Url> {
        self.graph.dependencies(uri)
    }

    pub fn get_dependents(&self, uri: &Url) -> Vec<Url> {
        self.graph.dependents(uri)
    }

    pub fn dependency_cycles(&self) -> Vec<Vec<Url>> {
        self.graph.cycles()
    }

    pub fn stats(&self) -> WorkspaceStats {
        WorkspaceStats {
            total_files: self.files.len(),
            scopes: self.files.values().filter(|f| f.scope_name.is_some()).count(),
            total_symbols: self.files.values().map(|f| f.symbols.len()).sum(),
            unparsable_files: self.files.values().filter(|f| !f.parsed).count(),
            dependency_edges: self.graph.edge_count(),
            dependency_cycles: self.graph.cycles().len(),
            skipped_files: self.skipped,
            ready: self.ready,
            built_at: self.built_at,
            build_ms: self.build_ms,
        }
    }

    /// A copy with `changed` files replaced and `removed` files dropped.
    fn with_changes(&self, changed: Vec<IndexedFile>, removed: &[Url]) -> Self {
        let mut files = self.files.clone();
        for uri in removed {
            files.remove(uri);
        }
        for file in changed {
            files.insert(file.uri.clone(), file);
        }
        let mut next = IndexSnapshot::from_files(files, self.skipped);
        next.ready = self.ready;
        next
    }
}

impl ScopeResolver for IndexSnapshot {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn resolves_scope(&self, name: &str) -> bool {
        self.files
            .values()
            .any(|file| file.scope_name.as_deref() == Some(name))
    }

    fn resolves_path(&self, from: &Url, path: &str) -> bool {
        let Ok(from) = from.to_file_path() else {
            return false;
        };
        let by_path: HashMap<PathBuf, &Url> = self
            .files
            .values()
            .map(|file| (graph::normalize(&file.path), &file.uri))
            .collect();
        graph::resolve_path(&from, path, &by_path).is_some()
    }

    fn cycle_members(&self, uri: &Url) -> Vec<CycleMember> {
        self.graph
            .cycle_through(uri)
            .into_iter()
            .filter_map(|member| {
                let file = self.files.get(&member)?;
                Some(CycleMember {
                    name: file.scope_name.clone()?,
                    range: file.scope_range,
                    uri: member,
                })
            })
            .collect()
    }
}

/// Paths reported by file events while a rebuild is running.
#[derive(Debug, Default)]
struct PendingChanges {
    changed: Vec<PathBuf>,
    removed: Vec<PathBuf>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Handle to the live index shared by the server.
#[derive(Debug, Default)]
pub struct WorkspaceIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    roots: RwLock<Vec<PathBuf>>,
    rebuild: Mutex<Option<CancelFlag>>,
    /// `Some` while a rebuild runs; refreshes queue their paths here so the
    /// rebuild re-reads them before swapping in.
    pending: Mutex<Option<PendingChanges>>,
}

impl WorkspaceIndex {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        WorkspaceIndex {
            roots: RwLock::new(roots),
            ..Default::default()
        }
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        self.roots.read().clone()
    }

    pub fn set_roots(&self, roots: Vec<PathBuf>) {
        *self.roots.write() = roots;
    }

    pub fn add_root(&self, root: PathBuf) {
        let mut roots = self.roots.write();
        if !roots.contains(&root) {
            roots.push(root);
        }
    }

    pub fn remove_root(&self, root: &Path) {
        self.roots.write().retain(|r| r != root);
    }

    /// Cancels any rebuild in flight and hands out the flag for a new one.
    fn begin_rebuild(&self) -> CancelFlag {
        let flag = CancelFlag::new();
        let mut pending = self.pending.lock();
        *pending = Some(PendingChanges::default());
        if let Some(previous) = self.rebuild.lock().replace(flag.clone()) {
            previous.cancel();
        }
        flag
    }

    /// Swaps in `next` only if the live snapshot is still `base`.
    fn swap_if_unchanged(&self, base: &Arc<IndexSnapshot>, next: IndexSnapshot) -> bool {
        let mut guard = self.snapshot.write();
        if !Arc::ptr_eq(&guard, base) {
            return false;
        }
        *guard = Arc::new(next);
        true
    }

    /// Full rebuild from the current roots.
    pub async fn index(&self, settings: &IndexSettings) -> Result<WorkspaceStats, IndexError> {
        let cancel = self.begin_rebuild();
        let started = Instant::now();
        let outcome = scan::scan(self.roots(), settings, &cancel).await?;
        let skipped = outcome.errors.len();
        let files = outcome
            .files
            .into_iter()
            .map(|file| (file.uri.clone(), file))
            .collect();
        let stats = self
            .finish_rebuild(files, skipped, started, settings, &cancel)
            .await?;

        info!(
            files = stats.total_files,
            symbols = stats.total_symbols,
            skipped = stats.skipped_files,
            elapsed_ms = stats.build_ms.unwrap_or_default(),
            "workspace indexed"
        );
        Ok(stats)
    }

    /// Folds in the paths queued by refreshes since the rebuild began, then
    /// swaps the result in. Nothing can be queued between the last check
    /// and the swap.
    async fn finish_rebuild(
        &self,
        mut files: HashMap<Url, IndexedFile>,
        skipped: usize,
        started: Instant,
        settings: &IndexSettings,
        cancel: &CancelFlag,
    ) -> Result<WorkspaceStats, IndexError> {
        loop {
            let queued = self.pending.lock().as_mut().map(std::mem::take);
            if let Some(queued) = queued.filter(|queued| !queued.is_empty()) {
                debug!(
                    changed = queued.changed.len(),
                    removed = queued.removed.len(),
                    "re-reading files changed during rebuild"
                );
                let rescanned = scan::scan_paths(queued.changed, settings, cancel).await?;
                for path in &queued.removed {
                    if let Ok(uri) = Url::from_file_path(path) {
                        files.remove(&uri);
                    }
                }
                files.extend(rescanned.files.into_iter().map(|file| (file.uri.clone(), file)));
                continue;
            }

            let mut snapshot = IndexSnapshot::from_files(files, skipped);
            snapshot.build_ms = Some(started.elapsed().as_millis() as u64);

            let mut pending = self.pending.lock();
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            if pending.as_ref().is_some_and(|queued| !queued.is_empty()) {
                drop(pending);
                files = snapshot.files;
                continue;
            }
            *pending = None;
            let stats = snapshot.stats();
            *self.snapshot.write() = Arc::new(snapshot);
            return Ok(stats);
        }
    }

    /// Re-reads only `changed` paths and drops `removed` ones.
    pub async fn refresh_files(
        &self,
        changed: Vec<PathBuf>,
        removed: Vec<PathBuf>,
        settings: &IndexSettings,
    ) -> Result<WorkspaceStats, IndexError> {
        let changed: Vec<PathBuf> = changed
            .into_iter()
            .filter(|path| DocumentKind::classify(path).is_some())
            .collect();
        if let Some(queued) = self.pending.lock().as_mut() {
            queued.changed.extend(changed.iter().cloned());
            queued.removed.extend(removed.iter().cloned());
        }

        let outcome = scan::scan_paths(changed, settings, &CancelFlag::new()).await?;
        let removed: Vec<Url> = removed
            .iter()
            .filter_map(|path| Url::from_file_path(path).ok())
            .collect();

        // The next snapshot is built without holding the lock; if anything
        // was swapped in meanwhile, apply the changes again on top of it.
        loop {
            let base = self.snapshot();
            let next = base.with_changes(outcome.files.clone(), &removed);
            let stats = next.stats();
            if self.swap_if_unchanged(&base, next) {
                debug!(files = stats.total_files, "workspace index refreshed");
                return Ok(stats);
            }
            debug!("index replaced during refresh, reapplying");
        }
    }

    pub fn find_symbols(&self, query: &str, case: Case) -> Vec<SymbolMatch> {
        self.snapshot().find_symbols(query, case)
    }

    pub fn find_references(&self, name: &str) -> Vec<Location> {
        self.snapshot().find_references(name, &HashMap::new(), None)
    }

    pub fn get_dependencies(&self, uri: &Url) -> Vec<Url> {
        self.snapshot().get_dependencies(uri)
    }

    pub fn get_dependents(&self, uri: &Url) -> Vec<Url> {
        self.snapshot().get_dependents(uri)
    }

    pub fn get_workspace_stats(&self) -> WorkspaceStats {
        self.snapshot().stats()
    }

    pub fn dependency_cycles(&self) -> Vec<Vec<Url>> {
        self.snapshot().dependency_cycles()
    }
}
