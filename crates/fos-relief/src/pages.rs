//! Live page registry.
//!
//! The orchestrator only reads pages: it asks the registry for the current
//! set and inspects each one. Registration and removal belong to the host.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Global page ID counter
static NEXT_PAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a registered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u64);

impl PageId {
    fn next() -> Self {
        Self(NEXT_PAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}

/// A top-level page as seen by memory relief.
pub trait Page: Send + Sync {
    /// Pages that do not represent user-visible content.
    fn is_utility_page(&self) -> bool;

    fn is_visible(&self) -> bool;

    fn is_audible(&self) -> bool;

    /// Monotonic instant at which the main frame last finished navigating.
    fn time_of_last_completed_navigation(&self) -> Option<Instant>;

    /// Ask the embedder to flush compositing layers soon.
    fn schedule_compositing_flush(&self);
}

/// Enumerates live pages.
pub trait PageRegistry: Send + Sync {
    fn live_pages(&self) -> Vec<Arc<dyn Page>>;
}

/// Transient view of a page used for kill eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSnapshot {
    pub is_visible: bool,
    pub is_audible: bool,
    pub time_of_last_completed_navigation: Option<Instant>,
}

impl PageSnapshot {
    /// Capture a page's state, or `None` for utility pages.
    pub fn capture(page: &dyn Page) -> Option<Self> {
        if page.is_utility_page() {
            return None;
        }
        Some(Self {
            is_visible: page.is_visible(),
            is_audible: page.is_audible(),
            time_of_last_completed_navigation: page.time_of_last_completed_navigation(),
        })
    }
}

/// Page state shared between the host and the registry.
#[derive(Debug)]
pub struct PageState {
    utility: bool,
    visible: AtomicBool,
    audible: AtomicBool,
    last_navigation: Mutex<Option<Instant>>,
    flush_requests: AtomicUsize,
}

impl PageState {
    /// A user-facing page, hidden and silent, never navigated.
    pub fn new() -> Self {
        Self::with_utility(false)
    }

    /// A background page excluded from visibility accounting.
    pub fn utility() -> Self {
        Self::with_utility(true)
    }

    fn with_utility(utility: bool) -> Self {
        Self {
            utility,
            visible: AtomicBool::new(false),
            audible: AtomicBool::new(false),
            last_navigation: Mutex::new(None),
            flush_requests: AtomicUsize::new(0),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    pub fn set_audible(&self, audible: bool) {
        self.audible.store(audible, Ordering::Relaxed);
    }

    /// Record that the main frame finished a navigation now.
    pub fn did_complete_navigation(&self) {
        self.set_last_navigation(Instant::now());
    }

    pub fn set_last_navigation(&self, at: Instant) {
        *self
            .last_navigation
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// How many compositing flushes have been requested.
    pub fn flush_requests(&self) -> usize {
        self.flush_requests.load(Ordering::Relaxed)
    }
}

impl Default for PageState {
    fn default() -> Self {
        Self::new()
    }
}

impl Page for PageState {
    fn is_utility_page(&self) -> bool {
        self.utility
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    fn is_audible(&self) -> bool {
        self.audible.load(Ordering::Relaxed)
    }

    fn time_of_last_completed_navigation(&self) -> Option<Instant> {
        *self
            .last_navigation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_compositing_flush(&self) {
        self.flush_requests.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-process page registry.
#[derive(Default)]
pub struct PageSet {
    pages: Mutex<Vec<(PageId, Arc<dyn Page>)>>,
}

impl PageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a page and return its ID.
    pub fn register(&self, page: Arc<dyn Page>) -> PageId {
        let id = PageId::next();
        self.lock().push((id, page));
        debug!(page = %id, "Registered page");
        id
    }

    /// Remove a page. Returns false if it was not registered.
    pub fn remove(&self, id: PageId) -> bool {
        let mut pages = self.lock();
        match pages.iter().position(|(page_id, _)| *page_id == id) {
            Some(pos) => {
                pages.remove(pos);
                debug!(page = %id, "Removed page");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(PageId, Arc<dyn Page>)>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PageRegistry for PageSet {
    fn live_pages(&self) -> Vec<Arc<dyn Page>> {
        self.lock().iter().map(|(_, page)| page.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_remove() {
        let set = PageSet::new();
        let first = set.register(Arc::new(PageState::new()));
        let second = set.register(Arc::new(PageState::utility()));

        assert_ne!(first, second);
        assert_eq!(set.len(), 2);

        assert!(set.remove(first));
        assert!(!set.remove(first));
        assert_eq!(set.live_pages().len(), 1);
    }

    #[test]
    fn test_snapshot_skips_utility_pages() {
        let utility = PageState::utility();
        utility.set_visible(true);
        assert!(PageSnapshot::capture(&utility).is_none());

        let page = PageState::new();
        page.set_audible(true);
        page.did_complete_navigation();
        let snapshot = PageSnapshot::capture(&page).unwrap();
        assert!(snapshot.is_audible);
        assert!(!snapshot.is_visible);
        assert!(snapshot.time_of_last_completed_navigation.is_some());
    }

    #[test]
    fn test_flush_requests_counted() {
        let page = PageState::new();
        page.schedule_compositing_flush();
        page.schedule_compositing_flush();
        assert_eq!(page.flush_requests(), 2);
    }
}
