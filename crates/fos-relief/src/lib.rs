//! fOS Memory Relief
//!
//! Coordinates process-wide memory release across independently owned
//! caches and subsystems, decides whether the process may be killed to
//! reclaim memory, and aborts with diagnostics when recovery has failed.
//!
//! # Relief Tiers
//!
//! | Severity | Blocking | Work |
//! |----------|----------|------|
//! | Noncritical | either | fonts, selector queries, dead resources, style caches |
//! | Critical | Synchronous | everything above, first: page cache, decoded data, compiled code, blocking GC |
//! | Critical | Asynchronous | same, with a coalesced GC request instead |
//!
//! Collaborators are injected through [`ReliefServices`]; nothing here is a
//! process-wide singleton.

mod allocator;
mod config;
mod diagnostics;
mod dispatch;
mod eligibility;
mod font_cache;
mod orchestrator;
mod page_cache;
mod pages;
mod platform;
mod pressure;
mod resource_cache;
mod services;
mod types;

pub use allocator::{AllocatorTrim, MimallocTrim};
pub use config::{ConfigError, MonitorConfig, ReliefConfig};
pub use diagnostics::{format_bytes, HeapStatistics, MemoryStatistics};
pub use dispatch::{DispatchError, Task, TaskDispatch, WorkerThread};
pub use eligibility::{KillEligibility, RECENT_NAVIGATION_WINDOW};
pub use font_cache::GlyphCache;
pub use orchestrator::{MemoryPressureListener, MemoryRelief};
pub use page_cache::{BackForwardCache, CachedPage};
pub use pages::{Page, PageId, PageRegistry, PageSet, PageSnapshot, PageState};
pub use platform::{MemoryCategoryUsage, PlatformHooks, SysinfoPlatform};
pub use pressure::{MemoryPressureLevel, MemoryPressureState, PressureFlag, RssError, RssMonitor};
pub use resource_cache::DecodedResourceCache;
pub use services::{
    Detached, Document, DocumentRegistry, FontCache, MediaElement, MediaRegistry, PageCache,
    ReliefServices, ResourceCache, ScriptEngine, StyleCaches, ValuePool,
};
pub use types::{Blocking, PruningReason, Severity};
