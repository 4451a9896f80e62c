//! Per-document analysis cache.
//!
//! Documents are interned into an arena of slots addressed by [`DocumentId`];
//! the URI map is consulted once per lookup. `clear` bumps an epoch counter
//! instead of dropping slots, so invalidating everything is O(1) and entries
//! written before the bump simply read as absent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tower_lsp::lsp_types::{Diagnostic, Url};

use crate::document::ParseResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(u32);

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub parse_result: ParseResult,
    pub validation: Vec<Diagnostic>,
    pub version: i32,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct Slot {
    uri: Url,
    entry: Option<Arc<CacheEntry>>,
    epoch: u64,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    ids: HashMap<Url, DocumentId>,
    epoch: u64,
}

impl Arena {
    fn live(&self, id: DocumentId) -> Option<&Arc<CacheEntry>> {
        let slot = self.slots.get(id.0 as usize)?;
        slot.entry.as_ref().filter(|_| slot.epoch == self.epoch)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub generation: u64,
}

#[derive(Debug, Default)]
pub struct DocumentCache {
    arena: RwLock<Arena>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self, uri: &Url) -> Option<DocumentId> {
        self.arena.read().ids.get(uri).copied()
    }

    pub fn uri(&self, id: DocumentId) -> Option<Url> {
        self.arena.read().slots.get(id.0 as usize).map(|slot| slot.uri.clone())
    }

    pub fn set(&self, uri: &Url, entry: impl Into<Arc<CacheEntry>>) -> DocumentId {
        let mut arena = self.arena.write();
        let epoch = arena.epoch;
        let id = match arena.ids.get(uri) {
            Some(id) => *id,
            None => {
                let id = DocumentId(arena.slots.len() as u32);
                arena.slots.push(Slot {
                    uri: uri.clone(),
                    entry: None,
                    epoch,
                });
                arena.ids.insert(uri.clone(), id);
                id
            }
        };
        let slot = &mut arena.slots[id.0 as usize];
        slot.entry = Some(entry.into());
        slot.epoch = epoch;
        id
    }

    /// The stored entry regardless of version.
    pub fn get(&self, uri: &Url) -> Option<Arc<CacheEntry>> {
        let arena = self.arena.read();
        let entry = arena.ids.get(uri).and_then(|id| arena.live(*id)).cloned();
        match entry {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        entry
    }

    /// The stored entry only if it was computed for `version`.
    pub fn get_current(&self, uri: &Url, version: i32) -> Option<Arc<CacheEntry>> {
        let entry = self.get(uri)?;
        if entry.version == version {
            Some(entry)
        } else {
            self.stale.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn remove(&self, uri: &Url) -> bool {
        let mut arena = self.arena.write();
        let Some(id) = arena.ids.get(uri).copied() else {
            return false;
        };
        let was_live = arena.live(id).is_some();
        arena.slots[id.0 as usize].entry = None;
        was_live
    }

    pub fn clear(&self) {
        self.arena.write().epoch += 1;
    }

    pub fn len(&self) -> usize {
        let arena = self.arena.read();
        (0..arena.slots.len())
            .filter(|&i| arena.live(DocumentId(i as u32)).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            generation: self.arena.read().epoch,
        }
    }
}
