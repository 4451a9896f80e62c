//! Instrumented request dispatch.
//!
//! Every query goes through [`dispatch_document`] or [`dispatch_workspace`].
//! The provider runs on the blocking pool under the configured watchdog; its
//! duration is recorded, and a failure of any kind is logged and turned into
//! the request's empty response instead of reaching the transport.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;
use tower_lsp::lsp_types::{
    CompletionResponse, DocumentSymbolResponse, SemanticTokens, SemanticTokensDelta,
    SemanticTokensFullDeltaResult, Url,
};
use tracing::debug;

use crate::cancel::CancelFlag;
use crate::config::Settings;
use crate::context::ProviderContext;
use crate::workspace::IndexSnapshot;

use super::engine::Engine;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider failed: {0}")]
    Failed(String),
    #[error("provider panicked: {0}")]
    Panicked(String),
    #[error("provider exceeded {0:?}")]
    TimedOut(Duration),
    #[error("request superseded by a newer edit")]
    Cancelled,
}

/// The value a request answers with when nothing can be computed.
pub trait EmptyResponse {
    fn empty() -> Self;
}

impl<T> EmptyResponse for Option<T> {
    fn empty() -> Self {
        None
    }
}

impl<T> EmptyResponse for Vec<T> {
    fn empty() -> Self {
        Vec::new()
    }
}

impl EmptyResponse for CompletionResponse {
    fn empty() -> Self {
        CompletionResponse::Array(Vec::new())
    }
}

impl EmptyResponse for DocumentSymbolResponse {
    fn empty() -> Self {
        DocumentSymbolResponse::Nested(Vec::new())
    }
}

impl EmptyResponse for SemanticTokens {
    fn empty() -> Self {
        SemanticTokens {
            result_id: None,
            data: Vec::new(),
        }
    }
}

impl EmptyResponse for SemanticTokensFullDeltaResult {
    fn empty() -> Self {
        SemanticTokensFullDeltaResult::TokensDelta(SemanticTokensDelta {
            result_id: None,
            edits: Vec::new(),
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "unknown panic payload".to_string(),
        },
    }
}

/// Runs `job` on the blocking pool under `timeout`.
async fn run_guarded<T, F>(job: F, timeout: Duration, cancel: &CancelFlag) -> Result<T, ProviderError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(job);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(_)) if cancel.is_cancelled() => Err(ProviderError::Cancelled),
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) if err.is_panic() => Err(ProviderError::Panicked(panic_message(err.into_panic()))),
        Ok(Err(err)) => Err(ProviderError::Failed(err.to_string())),
        Err(_) => {
            // Let a provider that checks its flag stop early.
            cancel.cancel();
            Err(ProviderError::TimedOut(timeout))
        }
    }
}

fn settle<T: EmptyResponse>(
    engine: &Engine,
    operation: &'static str,
    uri: Option<&Url>,
    started: Instant,
    result: Result<T, ProviderError>,
) -> T {
    let outcome = match &result {
        Ok(_) => "ok",
        Err(ProviderError::Cancelled) => "cancelled",
        Err(ProviderError::TimedOut(_)) => "timeout",
        Err(_) => "error",
    };
    engine.telemetry().metrics.record(
        operation,
        started.elapsed(),
        Some(json!({ "uri": uri.map(Url::as_str), "outcome": outcome })),
    );

    match result {
        Ok(value) => value,
        Err(ProviderError::Cancelled) => {
            debug!(operation, "dropping result computed for superseded text");
            T::empty()
        }
        Err(err) => {
            let context = match uri {
                Some(uri) => format!("{operation} {uri}"),
                None => operation.to_string(),
            };
            engine
                .telemetry()
                .errors
                .record(format!("{operation} failed"), err, Some(&context));
            T::empty()
        }
    }
}

fn skip<T: EmptyResponse>(engine: &Engine, operation: &'static str, uri: Option<&Url>, started: Instant) -> T {
    engine.telemetry().metrics.record(
        operation,
        started.elapsed(),
        Some(json!({ "uri": uri.map(Url::as_str), "outcome": "skipped" })),
    );
    T::empty()
}

/// Answers a request about one open document.
pub async fn dispatch_document<T, F>(
    engine: &Arc<Engine>,
    operation: &'static str,
    uri: &Url,
    provider: F,
) -> T
where
    T: EmptyResponse + Send + 'static,
    F: FnOnce(&ProviderContext) -> T + Send + 'static,
{
    let started = Instant::now();
    if !engine.is_ready() {
        debug!(operation, state = ?engine.state(), "request outside of a ready session");
        return skip(engine, operation, Some(uri), started);
    }
    let Some(context) = engine.context(uri) else {
        debug!(operation, %uri, "request for a document that is not open");
        return skip(engine, operation, Some(uri), started);
    };
    let timeout = Duration::from_millis(context.settings.providers.timeout_ms);
    let cancel = context.cancel.clone();
    let document = context.document.clone();

    let result = run_guarded(move || provider(&context), timeout, &cancel)
        .await
        .and_then(|value| {
            if engine.is_current(&document) {
                Ok(value)
            } else {
                Err(ProviderError::Cancelled)
            }
        });
    settle(engine, operation, Some(uri), started, result)
}

/// Answers a request that reads only the workspace index.
pub async fn dispatch_workspace<T, F>(engine: &Arc<Engine>, operation: &'static str, provider: F) -> T
where
    T: EmptyResponse + Send + 'static,
    F: FnOnce(&IndexSnapshot, &Settings) -> T + Send + 'static,
{
    let started = Instant::now();
    if !engine.is_ready() {
        return skip(engine, operation, None, started);
    }
    let index = engine.index().snapshot();
    let settings = engine.settings();
    let timeout = Duration::from_millis(settings.providers.timeout_ms);
    let cancel = CancelFlag::new();

    let result = run_guarded(move || provider(&index, &settings), timeout, &cancel).await;
    settle(engine, operation, None, started, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Hover;

    fn uri() -> Url {
        Url::parse("file:///ws/todos.yaml").unwrap()
    }

    fn engine_with_document() -> Arc<Engine> {
        let engine = Arc::new(Engine::default());
        engine.initialized();
        engine.open(uri(), 1, "todos: []\n".to_string());
        engine
    }

    #[tokio::test]
    async fn test_successful_request_is_timed() {
        let engine = engine_with_document();
        let text: Option<String> =
            dispatch_document(&engine, "test/text", &uri(), |ctx| Some(ctx.text().to_string())).await;
        assert_eq!(text.as_deref(), Some("todos: []\n"));
        assert_eq!(engine.telemetry().metrics.len(), 1);
        assert!(engine.telemetry().errors.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_provider_yields_empty_and_error_record() {
        let engine = engine_with_document();
        let result: Vec<u32> = dispatch_document(&engine, "test/panic", &uri(), |_| -> Vec<u32> {
            panic!("boom")
        })
        .await;
        assert!(result.is_empty());
        let records = engine.telemetry().errors.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].cause.contains("boom"));
        assert!(records[0].context.as_deref().unwrap().starts_with("test/panic"));
    }

    #[tokio::test]
    async fn test_stuck_provider_hits_watchdog() {
        let engine = engine_with_document();
        engine
            .update_settings(&json!({ "providers": { "timeout_ms": 50 } }))
            .unwrap();
        let result: Option<Hover> = dispatch_document(&engine, "test/stuck", &uri(), |ctx| {
            while !ctx.cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            None
        })
        .await;
        assert!(result.is_none());
        assert!(engine.telemetry().errors.records()[0].cause.contains("exceeded"));
    }

    #[tokio::test]
    async fn test_superseded_request_returns_empty_without_error() {
        let engine = engine_with_document();
        let editor = engine.clone();
        let result: CompletionResponse = dispatch_document(&engine, "test/cancel", &uri(), move |_| {
            editor.change(uri(), 2, "todos: []\n\n".to_string());
            CompletionResponse::Array(vec![Default::default()])
        })
        .await;
        assert_eq!(result, CompletionResponse::Array(Vec::new()));
        assert!(engine.telemetry().errors.is_empty());
    }

    #[tokio::test]
    async fn test_requests_before_ready_are_empty() {
        let engine = Arc::new(Engine::default());
        engine.open(uri(), 1, "todos: []\n".to_string());
        let result: Option<String> =
            dispatch_document(&engine, "test/early", &uri(), |_| Some("x".to_string())).await;
        assert!(result.is_none());
        let metrics = engine.telemetry().metrics.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].metadata.as_ref().unwrap()["outcome"], json!("skipped"));
        assert!(engine.telemetry().errors.is_empty());
    }

    #[tokio::test]
    async fn test_unopened_document_is_timed_as_skipped() {
        let engine = engine_with_document();
        let other = Url::parse("file:///ws/decisions.yaml").unwrap();
        let result: Vec<u32> = dispatch_document(&engine, "test/closed", &other, |_| vec![1]).await;
        assert!(result.is_empty());
        let summary = engine.telemetry().metrics.summary();
        assert_eq!(summary["test/closed"].count, 1);
    }
}
