//! The tower-lsp backend.
//!
//! [`Backend`] translates protocol messages into [`Engine`] calls and pushes
//! the diagnostics they produce. Queries go through the instrumented
//! dispatchers in [`dispatch`].

pub mod capabilities;
pub mod commands;
pub mod dispatch;
pub mod engine;

use std::sync::Arc;

use tower_lsp::jsonrpc::{Error, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, info, warn};

use crate::completion;
use crate::gotodef;
use crate::hover;
use crate::references;
use crate::symbol;

use self::dispatch::{dispatch_document, dispatch_workspace};
pub use self::engine::{Engine, Publication, SessionState};

pub struct Backend {
    client: Client,
    engine: Arc<Engine>,
}

impl Backend {
    /// A backend over an engine the caller keeps a handle to, so the
    /// session can be closed after the transport ends.
    pub fn new(client: Client, engine: Arc<Engine>) -> Self {
        Backend { client, engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    async fn publish(&self, publications: Vec<Publication>) {
        publish_all(&self.client, publications).await;
    }

    async fn publish_one(&self, publication: Option<Publication>) {
        if let Some(publication) = publication {
            self.publish(vec![publication]).await;
        }
    }

    /// Rebuilds the index in the background and republishes diagnostics.
    fn spawn_reindex(&self) {
        let engine = self.engine.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            match engine.reindex().await {
                Ok((stats, publications)) => {
                    debug!(files = stats.total_files, "index ready");
                    publish_all(&client, publications).await;
                }
                Err(crate::workspace::IndexError::Cancelled) => {
                    debug!("superseded index rebuild");
                }
                Err(err) => {
                    engine
                        .telemetry()
                        .errors
                        .record("workspace index rebuild failed", &err, Some("index"));
                }
            }
        });
    }

    async fn watch_files(&self) {
        if !self.engine.capabilities().watch_files {
            return;
        }
        let watchers = ["**/*.yaml", "**/*.yml", "**/*.rhema.*"]
            .into_iter()
            .map(|glob| FileSystemWatcher {
                glob_pattern: GlobPattern::String(glob.to_string()),
                kind: None,
            })
            .collect();
        let registration = Registration {
            id: "rhema-watched-files".to_string(),
            method: "workspace/didChangeWatchedFiles".to_string(),
            register_options: serde_json::to_value(DidChangeWatchedFilesRegistrationOptions {
                watchers,
            })
            .ok(),
        };
        if let Err(err) = self.client.register_capability(vec![registration]).await {
            warn!("file watcher registration failed: {err}");
        }
    }
}

async fn publish_all(client: &Client, publications: Vec<Publication>) {
    for publication in publications {
        client
            .publish_diagnostics(publication.uri, publication.diagnostics, publication.version)
            .await;
    }
}

fn method_not_found<T>() -> Result<T> {
    Err(Error::method_not_found())
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        info!("initializing");
        Ok(self.engine.initialize(&params))
    }

    async fn initialized(&self, _: InitializedParams) {
        self.engine.initialized();
        for error in self.engine.take_config_errors() {
            self.client
                .show_message(MessageType::WARNING, format!("rhema-lsp configuration: {error}"))
                .await;
        }
        self.watch_files().await;
        self.spawn_reindex();
    }

    async fn shutdown(&self) -> Result<()> {
        self.engine.shutdown();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        debug!(uri = %document.uri, "did_open");
        let publication = self
            .engine
            .open(document.uri, document.version, document.text);
        self.publish_one(publication).await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        let document = params.text_document;
        let publication = self
            .engine
            .change(document.uri, document.version, change.text);
        self.publish_one(publication).await;
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let publication = self.engine.save(params.text_document.uri, params.text);
        self.publish_one(publication).await;
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let publication = self.engine.close(&params.text_document.uri);
        self.publish_one(publication).await;
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        match self.engine.update_settings(&params.settings) {
            Ok(errors) => {
                for error in errors {
                    self.client
                        .show_message(MessageType::WARNING, format!("rhema-lsp configuration: {error}"))
                        .await;
                }
                let publications = self.engine.revalidate_open();
                self.publish(publications).await;
            }
            Err(err) => {
                self.engine.telemetry().errors.record(
                    "invalid configuration",
                    err,
                    Some("workspace/didChangeConfiguration"),
                );
            }
        }
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        let paths = |folders: Vec<WorkspaceFolder>| {
            folders
                .into_iter()
                .filter_map(|folder| folder.uri.to_file_path().ok())
                .collect::<Vec<_>>()
        };
        self.engine
            .workspace_folders_changed(paths(params.event.added), paths(params.event.removed));
        self.spawn_reindex();
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        match self.engine.files_changed(&params.changes).await {
            Ok(publications) => self.publish(publications).await,
            Err(err) => self.engine.telemetry().errors.record(
                "index refresh failed",
                err,
                Some("workspace/didChangeWatchedFiles"),
            ),
        }
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let position = params.text_document_position.position;
        let uri = params.text_document_position.text_document.uri;
        let response = dispatch_document(&self.engine, "textDocument/completion", &uri, move |ctx| {
            completion::get_completions(ctx, position)
        })
        .await;
        Ok(Some(response))
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position = params.text_document_position_params.position;
        let uri = params.text_document_position_params.text_document.uri;
        Ok(dispatch_document(&self.engine, "textDocument/hover", &uri, move |ctx| {
            hover::hover(ctx, position)
        })
        .await)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params.position;
        let uri = params.text_document_position_params.text_document.uri;
        Ok(dispatch_document(&self.engine, "textDocument/definition", &uri, move |ctx| {
            gotodef::goto_definition(ctx, position)
        })
        .await)
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position.position;
        let uri = params.text_document_position.text_document.uri;
        let include_declaration = params.context.include_declaration;
        Ok(dispatch_document(&self.engine, "textDocument/references", &uri, move |ctx| {
            references::references(ctx, position, include_declaration)
        })
        .await)
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let uri = params.text_document.uri;
        Ok(dispatch_document(&self.engine, "textDocument/documentSymbol", &uri, |ctx| {
            symbol::document_symbol(ctx)
        })
        .await)
    }

    async fn symbol(&self, params: WorkspaceSymbolParams) -> Result<Option<Vec<SymbolInformation>>> {
        let query = params.query;
        let symbols = dispatch_workspace(&self.engine, "workspace/symbol", move |index, settings| {
            symbol::workspace_symbol(index, &query, settings.case_matching)
        })
        .await;
        Ok(Some(symbols))
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        if !self.engine.capabilities().semantic_tokens {
            return method_not_found();
        }
        let tokenizer = self.engine.tokenizer();
        let uri = params.text_document.uri;
        let tokens: SemanticTokens =
            dispatch_document(&self.engine, "textDocument/semanticTokens/full", &uri, move |ctx| {
                tokenizer.provide_semantic_tokens(ctx.uri(), ctx.tree(), ctx.text())
            })
            .await;
        Ok(Some(SemanticTokensResult::Tokens(tokens)))
    }

    async fn semantic_tokens_full_delta(
        &self,
        params: SemanticTokensDeltaParams,
    ) -> Result<Option<SemanticTokensFullDeltaResult>> {
        if !self.engine.capabilities().semantic_tokens_delta {
            return method_not_found();
        }
        let tokenizer = self.engine.tokenizer();
        let uri = params.text_document.uri;
        let previous = params.previous_result_id;
        let result: SemanticTokensFullDeltaResult = dispatch_document(
            &self.engine,
            "textDocument/semanticTokens/full/delta",
            &uri,
            move |ctx| {
                tokenizer.provide_semantic_tokens_delta(ctx.uri(), ctx.tree(), ctx.text(), &previous)
            },
        )
        .await;
        Ok(Some(result))
    }

    async fn semantic_tokens_range(
        &self,
        params: SemanticTokensRangeParams,
    ) -> Result<Option<SemanticTokensRangeResult>> {
        if !self.engine.capabilities().semantic_tokens {
            return method_not_found();
        }
        let tokenizer = self.engine.tokenizer();
        let uri = params.text_document.uri;
        let range = params.range;
        let tokens: SemanticTokens =
            dispatch_document(&self.engine, "textDocument/semanticTokens/range", &uri, move |ctx| {
                tokenizer.provide_semantic_tokens_range(ctx.tree(), ctx.text(), range)
            })
            .await;
        Ok(Some(SemanticTokensRangeResult::Tokens(tokens)))
    }

    async fn execute_command(&self, params: ExecuteCommandParams) -> Result<Option<serde_json::Value>> {
        match commands::execute(&self.engine, &params.command).await {
            Some(output) => {
                self.publish(output.publications).await;
                Ok(Some(output.result))
            }
            None => Err(Error::invalid_params(format!(
                "unknown command `{}`",
                params.command
            ))),
        }
    }
}
