//! Incremental file scanning for the workspace index.
//!
//! Candidate paths are collected on the blocking pool, then read and parsed in
//! batches of `index.batch_size` files. Between batches the scan checks its
//! cancellation flag and yields to the runtime, so interactive requests keep
//! being served during a large rebuild.

use std::path::{Path, PathBuf};

use itertools::Itertools;
use rayon::prelude::*;
use thiserror::Error;
use tower_lsp::lsp_types::Url;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::IndexedFile;
use crate::cancel::CancelFlag;
use crate::config::IndexSettings;
use crate::document::DocumentKind;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is {size} bytes, above the {limit} byte limit", .path.display())]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("{} cannot be expressed as a file URI", .0.display())]
    InvalidPath(PathBuf),
    #[error("index worker failed: {0}")]
    Worker(String),
    #[error("index rebuild cancelled")]
    Cancelled,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<IndexedFile>,
    /// Per-file failures; the files were skipped.
    pub errors: Vec<IndexError>,
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".." && name != ".rhema"
}

/// Every classified file under `roots`, sorted.
pub fn collect_candidates(roots: &[PathBuf], settings: &IndexSettings) -> Vec<PathBuf> {
    roots
        .iter()
        .flat_map(|root| {
            WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| {
                    if e.depth() == 0 {
                        return true;
                    }
                    let Some(name) = e.file_name().to_str() else {
                        return false;
                    };
                    !(e.file_type().is_dir()
                        && (is_hidden(name) || settings.exclude.iter().any(|ex| ex == name)))
                })
                .flatten()
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| DocumentKind::classify(entry.path()).is_some())
                .map(|entry| entry.into_path())
        })
        .sorted()
        .dedup()
        .collect()
}

pub fn index_file(path: &Path, settings: &IndexSettings) -> Result<IndexedFile, IndexError> {
    let kind = DocumentKind::classify(path).ok_or_else(|| IndexError::InvalidPath(path.into()))?;
    let size = std::fs::metadata(path)
        .map_err(|source| IndexError::Io {
            path: path.into(),
            source,
        })?
        .len();
    if size > settings.max_file_size {
        return Err(IndexError::TooLarge {
            path: path.into(),
            size,
            limit: settings.max_file_size,
        });
    }
    let text = std::fs::read_to_string(path).map_err(|source| IndexError::Io {
        path: path.into(),
        source,
    })?;
    let uri = Url::from_file_path(path).map_err(|_| IndexError::InvalidPath(path.into()))?;
    Ok(IndexedFile::new(uri, path.to_path_buf(), kind, text))
}

/// Reads and parses `paths` in yielding batches.
pub async fn scan_paths(
    paths: Vec<PathBuf>,
    settings: &IndexSettings,
    cancel: &CancelFlag,
) -> Result<ScanOutcome, IndexError> {
    let mut outcome = ScanOutcome::default();
    let batch_size = settings.batch_size.max(1);

    for batch in paths.chunks(batch_size) {
        if cancel.is_cancelled() {
            debug!("index scan cancelled");
            return Err(IndexError::Cancelled);
        }
        let batch = batch.to_vec();
        let batch_settings = settings.clone();
        let results = tokio::task::spawn_blocking(move || {
            batch
                .par_iter()
                .map(|path| index_file(path, &batch_settings))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|err| IndexError::Worker(err.to_string()))?;

        for result in results {
            match result {
                Ok(file) => outcome.files.push(file),
                Err(err) => {
                    warn!("skipping file: {err}");
                    outcome.errors.push(err);
                }
            }
        }
        tokio::task::yield_now().await;
    }

    Ok(outcome)
}

/// Full scan of `roots`.
pub async fn scan(
    roots: Vec<PathBuf>,
    settings: &IndexSettings,
    cancel: &CancelFlag,
) -> Result<ScanOutcome, IndexError> {
    let walk_settings = settings.clone();
    let paths = tokio::task::spawn_blocking(move || collect_candidates(&roots, &walk_settings))
        .await
        .map_err(|err| IndexError::Worker(err.to_string()))?;
    debug!(candidates = paths.len(), "collected index candidates");
    scan_paths(paths, settings, cancel).await
}
