//! Cache of decoded subresources.
//!
//! A resource is live while at least one client references it and dead
//! otherwise. Dead resources stay cached for reuse until pruned. Live
//! resources are never evicted, but their decoded data can be destroyed and
//! re-decoded on demand.

use crate::services::ResourceCache;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Debug)]
struct Resource {
    encoded_size: usize,
    decoded_size: usize,
    clients: usize,
    last_access: u64,
}

impl Resource {
    fn is_live(&self) -> bool {
        self.clients > 0
    }

    fn dead_size(&self) -> usize {
        self.encoded_size + self.decoded_size
    }
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, Resource>,
    tick: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn dead_size(&self) -> usize {
        self.resources
            .values()
            .filter(|r| !r.is_live())
            .map(Resource::dead_size)
            .sum()
    }

    fn live_decoded_size(&self) -> usize {
        self.resources
            .values()
            .filter(|r| r.is_live())
            .map(|r| r.decoded_size)
            .sum()
    }

    /// URLs matching `filter`, least recently used first.
    fn lru_urls(&self, filter: impl Fn(&Resource) -> bool) -> Vec<String> {
        let mut urls: Vec<(&String, u64)> = self
            .resources
            .iter()
            .filter(|(_, r)| filter(r))
            .map(|(url, r)| (url, r.last_access))
            .collect();
        urls.sort_by_key(|(_, last_access)| *last_access);
        urls.into_iter().map(|(url, _)| url.clone()).collect()
    }
}

/// In-process decoded resource cache.
#[derive(Default)]
pub struct DecodedResourceCache {
    inner: Mutex<Inner>,
}

impl DecodedResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a resource. A new resource starts dead, with no clients; a
    /// cached one keeps its clients and takes the new sizes.
    pub fn insert(&self, url: impl Into<String>, encoded_size: usize, decoded_size: usize) {
        let mut inner = self.lock();
        let last_access = inner.touch();
        let resource = inner.resources.entry(url.into()).or_insert(Resource {
            encoded_size,
            decoded_size,
            clients: 0,
            last_access,
        });
        resource.encoded_size = encoded_size;
        resource.decoded_size = decoded_size;
        resource.last_access = last_access;
    }

    /// Reference a resource. Returns false if it is not cached.
    pub fn add_client(&self, url: &str) -> bool {
        let mut inner = self.lock();
        let last_access = inner.touch();
        match inner.resources.get_mut(url) {
            Some(resource) => {
                resource.clients += 1;
                resource.last_access = last_access;
                true
            }
            None => false,
        }
    }

    /// Drop a reference. The resource becomes dead with its last client.
    pub fn remove_client(&self, url: &str) {
        if let Some(resource) = self.lock().resources.get_mut(url) {
            resource.clients = resource.clients.saturating_sub(1);
        }
    }

    /// Record decoded data produced for a resource.
    pub fn set_decoded_size(&self, url: &str, decoded_size: usize) {
        if let Some(resource) = self.lock().resources.get_mut(url) {
            resource.decoded_size = decoded_size;
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.lock().resources.contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().resources.is_empty()
    }

    /// Bytes held by unreferenced resources.
    pub fn dead_size(&self) -> usize {
        self.lock().dead_size()
    }

    /// Decoded bytes held by referenced resources.
    pub fn live_decoded_size(&self) -> usize {
        self.lock().live_decoded_size()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResourceCache for DecodedResourceCache {
    fn prune_dead_to_size(&self, target: usize) {
        let mut inner = self.lock();
        let mut dead_size = inner.dead_size();
        if dead_size <= target {
            return;
        }

        let mut evicted = 0;
        for url in inner.lru_urls(|r| !r.is_live()) {
            if dead_size <= target {
                break;
            }
            if let Some(resource) = inner.resources.remove(&url) {
                dead_size -= resource.dead_size();
                evicted += 1;
                debug!(url = %url, "Evicted dead resource");
            }
        }

        info!(evicted, remaining = dead_size, "Pruned dead resources");
    }

    fn prune_live_to_size(&self, target: usize, destroy_decoded_data_for_all: bool) {
        let mut inner = self.lock();
        let mut live_size = inner.live_decoded_size();
        if live_size <= target && !destroy_decoded_data_for_all {
            return;
        }

        let mut destroyed = 0;
        for url in inner.lru_urls(|r| r.is_live() && r.decoded_size > 0) {
            if live_size <= target && !destroy_decoded_data_for_all {
                break;
            }
            if let Some(resource) = inner.resources.get_mut(&url) {
                live_size -= resource.decoded_size;
                resource.decoded_size = 0;
                destroyed += 1;
            }
        }

        info!(destroyed, remaining = live_size, "Destroyed decoded data of live resources");
    }

    fn size(&self) -> usize {
        let inner = self.lock();
        inner.dead_size() + inner.live_decoded_size()
    }
}
