//! rhema-lsp: a Language Server for Rhema knowledge files
//!
//! Rhema repositories describe themselves in small YAML documents: a
//! `scope.yaml` per scope plus `todos.yaml`, `decisions.yaml`,
//! `patterns.yaml`, `conventions.yaml` and `knowledge.yaml` alongside it.
//! This crate parses and validates those documents and answers editor
//! queries about them.
//!
//! # Overview
//!
//! - **Diagnostics**: YAML errors, schema violations and domain rules such as
//!   duplicate ids, dangling `depends_on` and unresolved scope dependencies
//! - **Workspace index**: every Rhema file under the workspace roots, with a
//!   petgraph dependency graph between scopes
//! - **Navigation**: go-to-definition, find-references and document/workspace
//!   symbols
//! - **Editing**: completion of keys, enum values, scope names and record ids;
//!   hover documentation; semantic tokens with deltas
//!
//! # Architecture
//!
//! - [`document`]: classification, the line outline and the typed document tree
//! - [`validator`] and [`diagnostics`]: the parse/validate pipeline
//! - [`cache`]: the per-document analysis cache
//! - [`workspace`]: the cross-file index
//! - [`server`]: session state, request dispatch and the tower-lsp backend
//!
//! ```ignore
//! use rhema_lsp::config::Settings;
//! use rhema_lsp::workspace::WorkspaceIndex;
//!
//! let settings = Settings::default();
//! let index = WorkspaceIndex::new(vec![repo_root]);
//! let stats = index.index(&settings.index).await?;
//! ```

// Document model and analysis
pub mod document;
pub mod schema;
pub mod validator;
pub mod diagnostics;
pub mod cache;
pub mod resolve;

// Workspace-wide state
pub mod workspace;

// LSP feature modules
pub mod completion;
pub mod gotodef;
pub mod hover;
pub mod references;
pub mod semantic_tokens;
pub mod symbol;

// Session plumbing
pub mod cancel;
pub mod config;
pub mod context;
pub mod server;
pub mod telemetry;

// Test utilities (only available in test builds)
#[cfg(test)]
pub mod test_utils;
