//! Capability negotiation.
//!
//! Negotiated once in `initialize` and never revisited. Optional providers
//! are advertised only when both the client and the settings allow them, so
//! the client never sends requests the server did not offer.

use serde::Serialize;
use tower_lsp::lsp_types::{
    ClientCapabilities, CompletionOptions, ExecuteCommandOptions, HoverProviderCapability, OneOf,
    PositionEncodingKind, SaveOptions, SemanticTokensFullOptions, SemanticTokensOptions,
    SemanticTokensServerCapabilities, ServerCapabilities, TextDocumentSyncCapability,
    TextDocumentSyncKind, TextDocumentSyncOptions, TextDocumentSyncSaveOptions,
    WorkspaceFoldersServerCapabilities, WorkspaceServerCapabilities,
};

use crate::config::Settings;
use crate::semantic_tokens;

use super::commands;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiatedCapabilities {
    pub semantic_tokens: bool,
    pub semantic_tokens_delta: bool,
    /// Client accepts `client/registerCapability` for file watching.
    pub watch_files: bool,
    pub workspace_folders: bool,
    /// Columns are exchanged as code points rather than UTF-16 units.
    pub utf32_positions: bool,
}

impl NegotiatedCapabilities {
    pub fn negotiate(client: &ClientCapabilities, settings: &Settings) -> Self {
        let tokens = client
            .text_document
            .as_ref()
            .and_then(|text_document| text_document.semantic_tokens.as_ref());
        let semantic_tokens = tokens.is_some() && settings.semantic_tokens;
        let semantic_tokens_delta = semantic_tokens
            && tokens
                .and_then(|tokens| tokens.requests.full.as_ref())
                .is_some_and(|full| match full {
                    SemanticTokensFullOptions::Bool(_) => false,
                    SemanticTokensFullOptions::Delta { delta } => delta.unwrap_or(false),
                });

        // Every column in the crate counts chars, which is UTF-32.
        let utf32_positions = client
            .general
            .as_ref()
            .and_then(|general| general.position_encodings.as_ref())
            .is_some_and(|encodings| encodings.contains(&PositionEncodingKind::UTF32));

        let workspace = client.workspace.as_ref();
        NegotiatedCapabilities {
            semantic_tokens,
            semantic_tokens_delta,
            watch_files: workspace
                .and_then(|workspace| workspace.did_change_watched_files.as_ref())
                .and_then(|watch| watch.dynamic_registration)
                .unwrap_or(false),
            workspace_folders: workspace
                .and_then(|workspace| workspace.workspace_folders)
                .unwrap_or(false),
            utf32_positions,
        }
    }

    pub fn server_capabilities(&self) -> ServerCapabilities {
        let semantic_tokens_provider = self.semantic_tokens.then(|| {
            SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
                work_done_progress_options: Default::default(),
                legend: semantic_tokens::legend(),
                range: Some(true),
                full: Some(if self.semantic_tokens_delta {
                    SemanticTokensFullOptions::Delta { delta: Some(true) }
                } else {
                    SemanticTokensFullOptions::Bool(true)
                }),
            })
        });

        ServerCapabilities {
            position_encoding: self.utf32_positions.then_some(PositionEncodingKind::UTF32),
            text_document_sync: Some(TextDocumentSyncCapability::Options(
                TextDocumentSyncOptions {
                    open_close: Some(true),
                    change: Some(TextDocumentSyncKind::FULL),
                    will_save: None,
                    will_save_wait_until: None,
                    save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                        include_text: Some(true),
                    })),
                },
            )),
            completion_provider: Some(CompletionOptions {
                resolve_provider: Some(false),
                trigger_characters: Some(vec![":".to_string(), "-".to_string(), " ".to_string()]),
                ..Default::default()
            }),
            hover_provider: Some(HoverProviderCapability::Simple(true)),
            definition_provider: Some(OneOf::Left(true)),
            references_provider: Some(OneOf::Left(true)),
            document_symbol_provider: Some(OneOf::Left(true)),
            workspace_symbol_provider: Some(OneOf::Left(true)),
            semantic_tokens_provider,
            execute_command_provider: Some(ExecuteCommandOptions {
                commands: commands::COMMANDS.iter().map(|c| c.to_string()).collect(),
                ..Default::default()
            }),
            workspace: self.workspace_folders.then(|| WorkspaceServerCapabilities {
                workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                    supported: Some(true),
                    change_notifications: Some(OneOf::Left(true)),
                }),
                file_operations: None,
            }),
            ..Default::default()
        }
    }
}
