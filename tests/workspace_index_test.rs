//! Integration tests for the workspace index and the session engine.
//!
//! Each test builds a small Rhema repository on disk and drives it through
//! the public API.

use std::fs;
use std::path::{Path, PathBuf};

use rhema_lsp::config::{Case, Settings};
use rhema_lsp::server::commands;
use rhema_lsp::server::{Engine, SessionState};
use rhema_lsp::workspace::WorkspaceIndex;
use tempfile::TempDir;
use tower_lsp::lsp_types::{
    FileChangeType, FileEvent, InitializeParams, Url, WorkspaceFolder,
};

/// Helper: create a temporary repository directory.
///
/// Returns (TempDir, PathBuf) - keep TempDir alive for the test duration.
/// The repository is a non-hidden subdirectory so the scanner does not skip it.
fn create_repo() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let repo = temp_dir.path().join("repo");
    fs::create_dir(&repo).expect("Failed to create repo subdirectory");
    (temp_dir, repo)
}

fn write(root: &Path, relative: &str, text: &str) -> PathBuf {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, text).unwrap();
    path
}

fn uri(path: &Path) -> Url {
    Url::from_file_path(path).unwrap()
}

fn engine_for(root: &Path) -> Engine {
    let engine = Engine::default();
    engine.initialize(&InitializeParams {
        workspace_folders: Some(vec![WorkspaceFolder {
            uri: Url::from_directory_path(root).unwrap(),
            name: "repo".to_string(),
        }]),
        ..Default::default()
    });
    engine.initialized();
    engine
}

// ============================================================================
// Index
// ============================================================================

#[tokio::test]
async fn test_index_dependency_graph() {
    let (_temp_dir, repo) = create_repo();
    let core = write(&repo, "core/scope.yaml", "scope:\n  name: core\n");
    let api = write(&repo, "api/scope.yaml", "scope:\n  name: api\n  dependencies: [core]\n");
    let web = write(
        &repo,
        "web/scope.yaml",
        "scope:\n  name: web\n  dependencies:\n    - name: api\n      path: ../api\n",
    );

    let index = WorkspaceIndex::new(vec![repo.clone()]);
    let stats = index.index(&Settings::default().index).await.unwrap();

    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.dependency_edges, 2);
    assert_eq!(stats.dependency_cycles, 0);
    assert_eq!(index.get_dependencies(&uri(&web)), vec![uri(&api)]);
    assert_eq!(index.get_dependents(&uri(&core)), vec![uri(&api)]);
}

#[tokio::test]
async fn test_index_reports_cycles() {
    let (_temp_dir, repo) = create_repo();
    write(&repo, "a/scope.yaml", "scope:\n  name: a\n  dependencies: [b]\n");
    write(&repo, "b/scope.yaml", "scope:\n  name: b\n  dependencies: [a]\n");

    let index = WorkspaceIndex::new(vec![repo]);
    let stats = index.index(&Settings::default().index).await.unwrap();
    assert_eq!(stats.dependency_cycles, 1);
    assert_eq!(index.dependency_cycles()[0].len(), 2);
}

#[tokio::test]
async fn test_unparsable_files_stay_indexed() {
    let (_temp_dir, repo) = create_repo();
    write(&repo, "todos.yaml", "todos: [unclosed\n");
    write(&repo, "decisions.yaml", "decisions:\n  - id: use-rust\n    title: Use Rust\n");

    let index = WorkspaceIndex::new(vec![repo]);
    let stats = index.index(&Settings::default().index).await.unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.unparsable_files, 1);

    let found = index.find_symbols("rust", Case::Ignore);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].symbol.name, "use-rust");
}

#[tokio::test]
async fn test_find_references_across_files() {
    let (_temp_dir, repo) = create_repo();
    write(&repo, "core/scope.yaml", "scope:\n  name: core\n");
    write(&repo, "api/scope.yaml", "scope:\n  name: api\n  dependencies: [core]\n");
    write(&repo, "web/scope.yaml", "scope:\n  name: web\n  dependencies: [core]\n");

    let index = WorkspaceIndex::new(vec![repo]);
    index.index(&Settings::default().index).await.unwrap();
    assert_eq!(index.find_references("core").len(), 3);
    assert!(index.find_references("missing").is_empty());
}

// ============================================================================
// Engine
// ============================================================================

#[tokio::test]
async fn test_engine_lifecycle_with_watched_files() {
    let (_temp_dir, repo) = create_repo();
    let api = write(&repo, "api/scope.yaml", "scope:\n  name: api\n  dependencies: [core]\n");

    let engine = engine_for(&repo);
    assert_eq!(engine.state(), SessionState::Ready);
    engine.reindex().await.unwrap();

    let opened = engine
        .open(uri(&api), 1, fs::read_to_string(&api).unwrap())
        .unwrap();
    assert_eq!(opened.diagnostics.len(), 1);
    assert!(opened.diagnostics[0].message.contains("core"));

    // The missing scope appears on disk; the watcher reports it.
    let core = write(&repo, "core/scope.yaml", "scope:\n  name: core\n");
    let publications = engine
        .files_changed(&[FileEvent::new(uri(&core), FileChangeType::CREATED)])
        .await
        .unwrap();
    assert_eq!(publications.len(), 1);
    assert!(publications[0].diagnostics.is_empty());

    // And disappears again.
    fs::remove_file(&core).unwrap();
    let publications = engine
        .files_changed(&[FileEvent::new(uri(&core), FileChangeType::DELETED)])
        .await
        .unwrap();
    assert_eq!(publications[0].diagnostics.len(), 1);

    let closed = engine.close(&uri(&api)).unwrap();
    assert!(closed.diagnostics.is_empty());
    assert!(engine.cache().get(&uri(&api)).is_none());
    assert_eq!(engine.index().get_workspace_stats().total_files, 1);
}

#[tokio::test]
async fn test_commands_from_external_crate() {
    let (_temp_dir, repo) = create_repo();
    write(&repo, "core/scope.yaml", "scope:\n  name: core\n");
    let engine = engine_for(&repo);

    let output = commands::execute(&engine, commands::REINDEX).await.unwrap();
    assert_eq!(output.result["totalFiles"], 1);

    let report = commands::execute(&engine, commands::PERFORMANCE_REPORT)
        .await
        .unwrap()
        .result;
    assert_eq!(report["workspace"]["scopes"], 1);
    assert!(commands::execute(&engine, "rhema.nope").await.is_none());
}
