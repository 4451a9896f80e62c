//! Rhema Language Server binary.
//!
//! # Usage
//!
//! ```bash
//! # Run the language server (stdio transport)
//! rhema-lsp
//!
//! # Validate every Rhema file below a directory
//! rhema-lsp check path/to/repo
//!
//! # Print workspace statistics as JSON
//! rhema-lsp index path/to/repo
//!
//! # With debug logging
//! RUST_LOG=debug rhema-lsp
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rhema_lsp::config::Settings;
use rhema_lsp::diagnostics;
use rhema_lsp::server::{Backend, Engine};
use rhema_lsp::workspace::WorkspaceIndex;
use tower_lsp::lsp_types::{ClientCapabilities, DiagnosticSeverity};
use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rhema-lsp", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the language server over stdio (default)
    Serve,
    /// Validate every Rhema file below PATH and print the diagnostics
    Check {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Index PATH and print workspace statistics as JSON
    Index {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rhema_lsp=info".parse()?)
                .add_directive("tower_lsp=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => Ok(serve().await),
        Command::Check { path } => check(&path).await,
        Command::Index { path } => {
            let (index, _) = build_index(&path).await?;
            let stats = index.get_workspace_stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn serve() -> ExitCode {
    tracing::info!(
        "Starting Rhema Language Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let engine = Arc::new(Engine::default());
    let (service, socket) = LspService::new({
        let engine = engine.clone();
        move |client| Backend::new(client, engine)
    });
    Server::new(stdin, stdout, socket).serve(service).await;

    // `serve` returns once the client sent `exit` or closed the stream.
    if engine.exit() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn build_index(path: &Path) -> anyhow::Result<(WorkspaceIndex, Settings)> {
    let root = path
        .canonicalize()
        .with_context(|| format!("cannot open {}", path.display()))?;
    let (settings, errors) = Settings::new(&root, &ClientCapabilities::default())?;
    for error in errors {
        eprintln!("configuration: {error}");
    }
    let index = WorkspaceIndex::new(vec![root]);
    index.index(&settings.index).await?;
    Ok((index, settings))
}

async fn check(path: &Path) -> anyhow::Result<ExitCode> {
    let (index, settings) = build_index(path).await?;
    let snapshot = index.snapshot();
    let cwd = std::env::current_dir()?;

    let mut files: Vec<_> = snapshot.files().collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    let (mut errors, mut warnings) = (0usize, 0usize);
    for file in files {
        let (_, found) = diagnostics::analyze(
            &file.text,
            &file.uri,
            snapshot.as_ref(),
            &settings.diagnostics,
        );
        let shown = pathdiff::diff_paths(&file.path, &cwd).unwrap_or_else(|| file.path.clone());
        for diagnostic in diagnostics::publishable(&found, &settings.diagnostics) {
            let label = match diagnostic.severity {
                Some(DiagnosticSeverity::ERROR) => {
                    errors += 1;
                    "error"
                }
                Some(DiagnosticSeverity::WARNING) => {
                    warnings += 1;
                    "warning"
                }
                _ => "info",
            };
            println!(
                "{}:{}:{}: {label}: {}",
                shown.display(),
                diagnostic.range.start.line + 1,
                diagnostic.range.start.character + 1,
                diagnostic.message
            );
        }
    }

    let stats = snapshot.stats();
    println!(
        "checked {} files: {errors} errors, {warnings} warnings",
        stats.total_files
    );
    Ok(if errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
