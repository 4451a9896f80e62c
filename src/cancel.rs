//! Cooperative cancellation for requests and index rebuilds.
//!
//! A [`CancelFlag`] is checked at yield points inside long operations. The
//! [`RequestTracker`] hands out one flag per in-flight request, grouped by the
//! document it reads, so that an edit can abandon every request computed
//! against the previous text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tower_lsp::lsp_types::Url;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
pub struct RequestTracker {
    in_flight: Mutex<HashMap<Url, Vec<Weak<AtomicBool>>>>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new request against `uri`.
    pub fn begin(&self, uri: &Url) -> CancelFlag {
        let flag = CancelFlag::new();
        let mut in_flight = self.in_flight.lock();
        let flags = in_flight.entry(uri.clone()).or_default();
        // Finished requests drop their flag; prune them as we go.
        flags.retain(|weak| weak.strong_count() > 0);
        flags.push(Arc::downgrade(&flag.0));
        flag
    }

    /// Cancels every request still running against `uri`. Returns how many were live.
    pub fn cancel_all(&self, uri: &Url) -> usize {
        let Some(flags) = self.in_flight.lock().remove(uri) else {
            return 0;
        };
        flags
            .iter()
            .filter_map(Weak::upgrade)
            .map(|flag| flag.store(true, Ordering::Release))
            .count()
    }

    pub fn in_flight(&self, uri: &Url) -> usize {
        self.in_flight
            .lock()
            .get(uri)
            .map(|flags| flags.iter().filter(|weak| weak.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri() -> Url {
        Url::parse("file:///ws/todos.yaml").unwrap()
    }

    #[test]
    fn test_cancel_all_flips_live_flags() {
        let tracker = RequestTracker::new();
        let first = tracker.begin(&uri());
        let second = tracker.begin(&uri());
        assert_eq!(tracker.in_flight(&uri()), 2);

        assert_eq!(tracker.cancel_all(&uri()), 2);
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert_eq!(tracker.in_flight(&uri()), 0);
    }

    #[test]
    fn test_finished_requests_are_not_counted() {
        let tracker = RequestTracker::new();
        {
            let _done = tracker.begin(&uri());
        }
        let live = tracker.begin(&uri());
        assert_eq!(tracker.in_flight(&uri()), 1);
        assert_eq!(tracker.cancel_all(&uri()), 1);
        assert!(live.is_cancelled());
    }

    #[test]
    fn test_other_documents_are_untouched() {
        let tracker = RequestTracker::new();
        let other = Url::parse("file:///ws/scope.yaml").unwrap();
        let flag = tracker.begin(&other);
        tracker.cancel_all(&uri());
        assert!(!flag.is_cancelled());
    }
}
