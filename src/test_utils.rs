//! Shared test utilities for rhema-lsp.
//!
//! Only compiled when running tests.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use tower_lsp::lsp_types::Url;

use crate::cache::CacheEntry;
use crate::cancel::CancelFlag;
use crate::config::Settings;
use crate::context::ProviderContext;
use crate::diagnostics;
use crate::document::{Document, DocumentKind};
use crate::workspace::{IndexSnapshot, IndexedFile, WorkspaceIndex};

/// Root under which in-memory fixtures live.
const FIXTURE_ROOT: &str = "/workspace";

/// Creates a temporary workspace directory for testing.
///
/// Returns the TempDir handle (keep it alive for the test) and the path of a
/// non-hidden `workspace` subdirectory. Temp directories can live under paths
/// like `/tmp/.tmpXXXXX`, and the index scanner skips hidden directories.
pub fn create_test_workspace_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let workspace_dir = temp_dir.path().join("workspace");
    fs::create_dir(&workspace_dir).expect("Failed to create workspace subdirectory");
    (temp_dir, workspace_dir)
}

/// Creates a workspace on disk and indexes it with default settings.
///
/// `setup_fn` receives the workspace directory and writes files before the
/// index is built.
pub async fn create_test_workspace<F>(setup_fn: F) -> (TempDir, PathBuf, WorkspaceIndex)
where
    F: FnOnce(&Path),
{
    let (temp_dir, workspace_dir) = create_test_workspace_dir();
    setup_fn(&workspace_dir);
    let index = WorkspaceIndex::new(vec![workspace_dir.clone()]);
    index
        .index(&Settings::default().index)
        .await
        .expect("Failed to index test workspace");
    (temp_dir, workspace_dir, index)
}

/// URI of an in-memory fixture file, e.g. `test_uri("svc/scope.yaml")`.
pub fn test_uri(relative: &str) -> Url {
    Url::from_file_path(Path::new(FIXTURE_ROOT).join(relative)).expect("fixture path is absolute")
}

fn indexed(relative: &str, text: &str) -> IndexedFile {
    let path = Path::new(FIXTURE_ROOT).join(relative);
    let kind = DocumentKind::classify(&path).expect("fixture name is a Rhema file");
    IndexedFile::new(test_uri(relative), path, kind, text.to_string())
}

/// An index snapshot over in-memory files; nothing touches the disk.
pub fn snapshot_of(files: &[(&str, &str)]) -> IndexSnapshot {
    let files = files
        .iter()
        .map(|(relative, text)| {
            let file = indexed(relative, text);
            (file.uri.clone(), file)
        })
        .collect::<HashMap<_, _>>();
    IndexSnapshot::from_files(files, 0)
}

/// Provider context for one open document and an index of `others` plus
/// the document itself.
pub fn provider_context_with_index(relative: &str, text: &str, others: &[(&str, &str)]) -> ProviderContext {
    let mut files = others.to_vec();
    files.push((relative, text));
    let index = Arc::new(snapshot_of(&files));

    let uri = test_uri(relative);
    let kind = DocumentKind::classify_uri(&uri).expect("fixture name is a Rhema file");
    let settings = Arc::new(Settings::default());
    let (parse_result, validation) =
        diagnostics::analyze(text, &uri, index.as_ref(), &settings.diagnostics);
    let document = Arc::new(Document::new(uri.clone(), 1, text.to_string(), kind));

    ProviderContext {
        entry: Arc::new(CacheEntry {
            parse_result,
            validation,
            version: 1,
            last_modified: Utc::now(),
        }),
        open_documents: HashMap::from([(uri, document.clone())]),
        document,
        index,
        settings,
        cancel: CancelFlag::new(),
    }
}

/// Provider context for a single open document in an otherwise empty workspace.
pub fn provider_context(relative: &str, text: &str) -> ProviderContext {
    provider_context_with_index(relative, text, &[])
}
