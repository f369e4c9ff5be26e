//! Collaborator interfaces driven by [`MemoryRelief`](crate::MemoryRelief).
//!
//! Every cache and subsystem the relief pass touches is reached through one
//! of these traits. Hosts hand the orchestrator a [`ReliefServices`] bundle
//! at construction; anything a host does not have stays [`Detached`].

use crate::allocator::AllocatorTrim;
use crate::diagnostics::HeapStatistics;
use crate::dispatch::TaskDispatch;
use crate::pages::{Page, PageRegistry};
use crate::platform::PlatformHooks;
use crate::pressure::MemoryPressureState;
use crate::types::PruningReason;
use std::sync::Arc;

/// Font and glyph data.
pub trait FontCache: Send + Sync {
    /// Drop font data that has not been used recently.
    fn purge_inactive_font_data(&self);

    /// Drop cached glyph width measurements.
    fn clear_width_caches(&self);
}

/// Back-forward cache of suspended page snapshots.
pub trait PageCache: Send + Sync {
    fn prune_to_size(&self, target: usize, reason: PruningReason);

    /// Number of cached pages.
    fn size(&self) -> usize;
}

/// Cache of decoded subresources (images, media, fonts).
pub trait ResourceCache: Send + Sync {
    /// Evict unreferenced entries until at most `target` bytes of them remain.
    /// Referenced entries are never touched.
    fn prune_dead_to_size(&self, target: usize);

    /// Shed decoded data of referenced entries until at most `target` bytes
    /// remain. With `destroy_decoded_data_for_all`, decoded buffers of every
    /// live entry are destroyed, not only the ones needed to reach the target.
    fn prune_live_to_size(&self, target: usize, destroy_decoded_data_for_all: bool);

    /// Bytes held: dead entries plus decoded data of live entries.
    fn size(&self) -> usize;
}

/// Shared pool of interned values (e.g. computed style values).
pub trait ValuePool: Send + Sync {
    fn drain(&self);
}

/// Process-wide style sharing caches.
pub trait StyleCaches: Send + Sync {
    fn clear_presentation_attribute_cache(&self);
    fn clear_inline_style_sheet_cache(&self);
}

/// A live document.
pub trait Document: Send + Sync {
    fn clear_selector_query_cache(&self);

    /// Release the cached style resolver; it is rebuilt on next use.
    fn clear_style_resolver(&self);
}

pub trait DocumentRegistry: Send + Sync {
    fn live_documents(&self) -> Vec<Arc<dyn Document>>;
}

/// A media element that may hold buffered data.
pub trait MediaElement: Send + Sync {
    fn is_paused(&self) -> bool;
    fn purge_buffered_data_if_possible(&self);
}

pub trait MediaRegistry: Send + Sync {
    fn media_elements(&self) -> Vec<Arc<dyn MediaElement>>;
}

/// The script engine heap and its garbage collector.
pub trait ScriptEngine: Send + Sync {
    /// Forget compiled code, unless a collection is already running.
    fn delete_compiled_code_if_not_collecting(&self);

    /// Run a full collection now and wait for it.
    fn collect_now(&self);

    /// Request a collection soon. A request that follows a recent pass, or
    /// one that is already scheduled, is coalesced.
    fn collect_soon_if_not_done_recently(&self);

    /// Heap figures for diagnostics, if the engine can provide them.
    fn heap_statistics(&self) -> Option<HeapStatistics>;
}

/// Collaborator that is not present in this process.
///
/// Implements every collaborator trait as an empty registry or a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl FontCache for Detached {
    fn purge_inactive_font_data(&self) {}
    fn clear_width_caches(&self) {}
}

impl PageCache for Detached {
    fn prune_to_size(&self, _target: usize, _reason: PruningReason) {}

    fn size(&self) -> usize {
        0
    }
}

impl ResourceCache for Detached {
    fn prune_dead_to_size(&self, _target: usize) {}
    fn prune_live_to_size(&self, _target: usize, _destroy_decoded_data_for_all: bool) {}

    fn size(&self) -> usize {
        0
    }
}

impl ValuePool for Detached {
    fn drain(&self) {}
}

impl StyleCaches for Detached {
    fn clear_presentation_attribute_cache(&self) {}
    fn clear_inline_style_sheet_cache(&self) {}
}

impl DocumentRegistry for Detached {
    fn live_documents(&self) -> Vec<Arc<dyn Document>> {
        Vec::new()
    }
}

impl MediaRegistry for Detached {
    fn media_elements(&self) -> Vec<Arc<dyn MediaElement>> {
        Vec::new()
    }
}

impl ScriptEngine for Detached {
    fn delete_compiled_code_if_not_collecting(&self) {}
    fn collect_now(&self) {}
    fn collect_soon_if_not_done_recently(&self) {}

    fn heap_statistics(&self) -> Option<HeapStatistics> {
        None
    }
}

impl PageRegistry for Detached {
    fn live_pages(&self) -> Vec<Arc<dyn Page>> {
        Vec::new()
    }
}

impl MemoryPressureState for Detached {
    fn is_under_memory_pressure(&self) -> bool {
        false
    }
}

impl PlatformHooks for Detached {}

impl AllocatorTrim for Detached {
    fn release_free_memory(&self) {}
}

/// Handles to every collaborator a relief pass drives.
#[derive(Clone)]
pub struct ReliefServices {
    pub font_cache: Arc<dyn FontCache>,
    pub page_cache: Arc<dyn PageCache>,
    pub resource_cache: Arc<dyn ResourceCache>,
    pub value_pool: Arc<dyn ValuePool>,
    pub style_caches: Arc<dyn StyleCaches>,
    pub documents: Arc<dyn DocumentRegistry>,
    pub media: Arc<dyn MediaRegistry>,
    pub script_engine: Arc<dyn ScriptEngine>,
    pub pages: Arc<dyn PageRegistry>,
    pub pressure: Arc<dyn MemoryPressureState>,
    pub platform: Arc<dyn PlatformHooks>,
    pub allocator: Arc<dyn AllocatorTrim>,
    /// Threads whose allocator caches can only be trimmed from the thread itself.
    pub dedicated_threads: Vec<Arc<dyn TaskDispatch>>,
}

impl ReliefServices {
    /// A bundle where every collaborator is [`Detached`].
    pub fn detached() -> Self {
        let detached = Arc::new(Detached);
        Self {
            font_cache: detached.clone(),
            page_cache: detached.clone(),
            resource_cache: detached.clone(),
            value_pool: detached.clone(),
            style_caches: detached.clone(),
            documents: detached.clone(),
            media: detached.clone(),
            script_engine: detached.clone(),
            pages: detached.clone(),
            pressure: detached.clone(),
            platform: detached.clone(),
            allocator: detached,
            dedicated_threads: Vec::new(),
        }
    }

    pub fn with_font_cache(mut self, font_cache: Arc<dyn FontCache>) -> Self {
        self.font_cache = font_cache;
        self
    }

    pub fn with_page_cache(mut self, page_cache: Arc<dyn PageCache>) -> Self {
        self.page_cache = page_cache;
        self
    }

    pub fn with_resource_cache(mut self, resource_cache: Arc<dyn ResourceCache>) -> Self {
        self.resource_cache = resource_cache;
        self
    }

    pub fn with_value_pool(mut self, value_pool: Arc<dyn ValuePool>) -> Self {
        self.value_pool = value_pool;
        self
    }

    pub fn with_style_caches(mut self, style_caches: Arc<dyn StyleCaches>) -> Self {
        self.style_caches = style_caches;
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentRegistry>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_media(mut self, media: Arc<dyn MediaRegistry>) -> Self {
        self.media = media;
        self
    }

    pub fn with_script_engine(mut self, script_engine: Arc<dyn ScriptEngine>) -> Self {
        self.script_engine = script_engine;
        self
    }

    pub fn with_pages(mut self, pages: Arc<dyn PageRegistry>) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_pressure(mut self, pressure: Arc<dyn MemoryPressureState>) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn PlatformHooks>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn AllocatorTrim>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_dedicated_thread(mut self, thread: Arc<dyn TaskDispatch>) -> Self {
        self.dedicated_threads.push(thread);
        self
    }
}

impl Default for ReliefServices {
    fn default() -> Self {
        Self::detached()
    }
}
