//! Back-forward cache of suspended pages.

use crate::pages::PageId;
use crate::services::PageCache;
use crate::types::PruningReason;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// A suspended page kept for instant back/forward navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub page_id: PageId,
    pub url: String,
    pub size_bytes: usize,
}

/// Bounded cache of suspended pages, oldest evicted first.
pub struct BackForwardCache {
    capacity: usize,
    entries: Mutex<VecDeque<CachedPage>>,
}

impl BackForwardCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Suspend a page into the cache, evicting the oldest beyond capacity.
    pub fn add(&self, page: CachedPage) {
        let mut entries = self.lock();
        entries.retain(|cached| cached.page_id != page.page_id);
        entries.push_back(page);
        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                debug!(page = %evicted.page_id, "Evicted page from back-forward cache");
            }
        }
    }

    /// Take a page back out of the cache to restore it.
    pub fn take(&self, page_id: PageId) -> Option<CachedPage> {
        let mut entries = self.lock();
        let pos = entries.iter().position(|cached| cached.page_id == page_id)?;
        entries.remove(pos)
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().iter().map(|cached| cached.size_bytes).sum()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CachedPage>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PageCache for BackForwardCache {
    fn prune_to_size(&self, target: usize, reason: PruningReason) {
        let mut entries = self.lock();
        let mut freed = 0;
        let mut pruned = 0;
        while entries.len() > target {
            match entries.pop_front() {
                Some(evicted) => {
                    freed += evicted.size_bytes;
                    pruned += 1;
                }
                None => break,
            }
        }

        if pruned > 0 {
            info!(
                pruned,
                freed,
                remaining = entries.len(),
                "Pruned back-forward cache ({})",
                reason
            );
        }
    }

    fn size(&self) -> usize {
        self.lock().len()
    }
}
