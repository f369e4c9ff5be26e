//! Process-wide memory relief.
//!
//! # Release order
//!
//! ```text
//! release_memory(severity, blocking)
//!     │
//!     ├── Critical only ─────────────────────────────┐
//!     │   prune back-forward cache to 0              │
//!     │   destroy decoded data of live resources     │
//!     │   drain value pool                           │
//!     │   clear style resolvers (every document)     │
//!     │   delete compiled code unless collecting     │
//!     │   purge buffered data of paused media        │
//!     │   collect now / collect soon                 │
//!     │   schedule compositing flush (every page)    │
//!     ├──────────────────────────────────────────────┘
//!     │
//!     ├── Always
//!     │   purge inactive fonts, clear width caches
//!     │   clear selector query caches (every document)
//!     │   prune dead resources to 0
//!     │   clear presentation attribute / inline style caches
//!     │
//!     ├── platform hook
//!     ├── allocator trim: post to dedicated threads, then this thread
//!     └── notify listeners
//! ```
//!
//! The biggest wins run first. Calls are strictly sequential on the caller's
//! thread; only the per-thread allocator trims are posted elsewhere, and
//! nobody waits for them.

use crate::config::ReliefConfig;
use crate::diagnostics::MemoryStatistics;
use crate::eligibility::{KillEligibility, RECENT_NAVIGATION_WINDOW};
use crate::pages::PageSnapshot;
use crate::services::ReliefServices;
use crate::types::{Blocking, PruningReason, Severity};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Called after every relief pass with the pass severity.
pub type MemoryPressureListener = Arc<dyn Fn(Severity) + Send + Sync>;

/// Drives every collaborator through the graduated release protocol.
///
/// Not reentrant: callers serialize `release_memory` on one control thread.
pub struct MemoryRelief {
    services: ReliefServices,
    recent_navigation_window: Duration,
    listeners: Mutex<Vec<MemoryPressureListener>>,
}

impl MemoryRelief {
    pub fn new(services: ReliefServices) -> Self {
        Self {
            services,
            recent_navigation_window: RECENT_NAVIGATION_WINDOW,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(services: ReliefServices, config: &ReliefConfig) -> Self {
        Self {
            recent_navigation_window: config.recent_navigation_window(),
            ..Self::new(services)
        }
    }

    pub fn services(&self) -> &ReliefServices {
        &self.services
    }

    /// Subscribe to handled memory pressure events.
    pub fn subscribe(&self, listener: MemoryPressureListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Release as much memory as `severity` allows.
    pub fn release_memory(&self, severity: Severity, blocking: Blocking) {
        let start = Instant::now();
        info!(%severity, %blocking, "Releasing memory");

        if severity.is_critical() {
            self.release_critical_memory(blocking);
        }

        self.release_noncritical_memory();

        self.services.platform.release_memory(severity);

        self.release_allocator_memory();

        self.notify_listeners(severity);

        debug!(%severity, elapsed = ?start.elapsed(), "Memory release finished");
    }

    fn release_noncritical_memory(&self) {
        let services = &self.services;

        services.font_cache.purge_inactive_font_data();
        services.font_cache.clear_width_caches();

        for document in services.documents.live_documents() {
            document.clear_selector_query_cache();
        }

        services.resource_cache.prune_dead_to_size(0);

        services.style_caches.clear_presentation_attribute_cache();
        services.style_caches.clear_inline_style_sheet_cache();
    }

    fn release_critical_memory(&self, blocking: Blocking) {
        let services = &self.services;

        // Critical relief without pressure only happens right before suspension.
        let reason = if services.pressure.is_under_memory_pressure() {
            PruningReason::MemoryPressure
        } else {
            PruningReason::ProcessSuspended
        };
        services.page_cache.prune_to_size(0, reason);

        services.resource_cache.prune_live_to_size(0, true);

        services.value_pool.drain();

        for document in services.documents.live_documents() {
            document.clear_style_resolver();
        }

        services.script_engine.delete_compiled_code_if_not_collecting();

        for media in services.media.media_elements() {
            if media.is_paused() {
                media.purge_buffered_data_if_possible();
            }
        }

        match blocking {
            Blocking::Synchronous => services.script_engine.collect_now(),
            Blocking::Asynchronous => services.script_engine.collect_soon_if_not_done_recently(),
        }

        // Tiling coverage shrinks under pressure; drop the excess tiles now.
        for page in services.pages.live_pages() {
            page.schedule_compositing_flush();
        }
    }

    fn release_allocator_memory(&self) {
        // Thread-local allocator caches can only be released by their owner.
        for thread in &self.services.dedicated_threads {
            let allocator = self.services.allocator.clone();
            debug!(thread = thread.name(), "Posting allocator trim");
            thread.dispatch(Box::new(move || allocator.release_free_memory()));
        }
        self.services.allocator.release_free_memory();
    }

    fn notify_listeners(&self, severity: Severity) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(severity);
        }
    }

    /// Kill eligibility of this process as of `now`.
    pub fn kill_eligibility_at(&self, now: Instant) -> KillEligibility {
        let snapshots = self
            .services
            .pages
            .live_pages()
            .iter()
            .filter_map(|page| PageSnapshot::capture(page.as_ref()))
            .collect::<Vec<_>>();
        KillEligibility::evaluate(snapshots, now, self.recent_navigation_window)
    }

    /// Whether an external supervisor may kill this process to reclaim memory.
    pub fn process_is_eligible_for_memory_kill(&self) -> bool {
        let eligibility = self.kill_eligibility_at(Instant::now());
        if !eligibility.is_eligible() {
            info!(
                %eligibility,
                "Process not eligible for memory kill: {}",
                eligibility.reasons().join(", ")
            );
        }
        eligibility.is_eligible()
    }

    pub fn memory_statistics(&self) -> MemoryStatistics {
        MemoryStatistics::collect(&self.services)
    }

    pub fn log_memory_statistics_at_time_of_death(&self) {
        self.memory_statistics().log();
    }

    /// Log what is known about memory, then abort. Never returns.
    pub fn did_exceed_memory_limit_and_failed_to_recover(&self) -> ! {
        error!(
            "Crashing non-visible process due to excessive memory usage + inability to free up memory below panic threshold."
        );
        self.log_memory_statistics_at_time_of_death();
        std::process::abort()
    }

    pub fn jettison_expensive_objects_on_top_level_navigation(&self) {
        self.services
            .platform
            .jettison_expensive_objects_on_top_level_navigation();
    }

    pub fn register_memory_release_notify_callbacks(&self) {
        self.services.platform.register_memory_release_notify_callbacks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorTrim;
    use crate::diagnostics::HeapStatistics;
    use crate::dispatch::{Task, TaskDispatch};
    use crate::pages::{Page, PageRegistry};
    use crate::platform::PlatformHooks;
    use crate::pressure::MemoryPressureState;
    use crate::services::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every collaborator call in order.
    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<&'static str>>>,
        reason: Arc<Mutex<Option<PruningReason>>>,
        paused: bool,
        under_pressure: bool,
    }

    impl Recorder {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        fn services(&self) -> ReliefServices {
            let this = Arc::new(self.clone());
            ReliefServices::detached()
                .with_font_cache(this.clone())
                .with_page_cache(this.clone())
                .with_resource_cache(this.clone())
                .with_value_pool(this.clone())
                .with_style_caches(this.clone())
                .with_documents(this.clone())
                .with_media(this.clone())
                .with_script_engine(this.clone())
                .with_pages(this.clone())
                .with_pressure(this.clone())
                .with_platform(this.clone())
                .with_allocator(this.clone())
                .with_dedicated_thread(this)
        }
    }

    impl FontCache for Recorder {
        fn purge_inactive_font_data(&self) {
            self.record("purge_inactive_font_data");
        }
        fn clear_width_caches(&self) {
            self.record("clear_width_caches");
        }
    }

    impl PageCache for Recorder {
        fn prune_to_size(&self, _target: usize, reason: PruningReason) {
            *self.reason.lock().unwrap() = Some(reason);
            self.record("page_cache_prune");
        }
        fn size(&self) -> usize {
            0
        }
    }

    impl ResourceCache for Recorder {
        fn prune_dead_to_size(&self, _target: usize) {
            self.record("prune_dead_resources");
        }
        fn prune_live_to_size(&self, _target: usize, destroy_decoded_data_for_all: bool) {
            assert!(destroy_decoded_data_for_all);
            self.record("prune_live_resources");
        }
        fn size(&self) -> usize {
            0
        }
    }

    impl ValuePool for Recorder {
        fn drain(&self) {
            self.record("drain_value_pool");
        }
    }

    impl StyleCaches for Recorder {
        fn clear_presentation_attribute_cache(&self) {
            self.record("clear_presentation_attribute_cache");
        }
        fn clear_inline_style_sheet_cache(&self) {
            self.record("clear_inline_style_sheet_cache");
        }
    }

    impl Document for Recorder {
        fn clear_selector_query_cache(&self) {
            self.record("clear_selector_query_cache");
        }
        fn clear_style_resolver(&self) {
            self.record("clear_style_resolver");
        }
    }

    impl DocumentRegistry for Recorder {
        fn live_documents(&self) -> Vec<Arc<dyn Document>> {
            vec![Arc::new(self.clone())]
        }
    }

    impl MediaElement for Recorder {
        fn is_paused(&self) -> bool {
            self.paused
        }
        fn purge_buffered_data_if_possible(&self) {
            self.record("purge_buffered_media");
        }
    }

    impl MediaRegistry for Recorder {
        fn media_elements(&self) -> Vec<Arc<dyn MediaElement>> {
            vec![Arc::new(self.clone())]
        }
    }

    impl ScriptEngine for Recorder {
        fn delete_compiled_code_if_not_collecting(&self) {
            self.record("delete_compiled_code");
        }
        fn collect_now(&self) {
            self.record("collect_now");
        }
        fn collect_soon_if_not_done_recently(&self) {
            self.record("collect_soon");
        }
        fn heap_statistics(&self) -> Option<HeapStatistics> {
            None
        }
    }

    impl Page for Recorder {
        fn is_utility_page(&self) -> bool {
            false
        }
        fn is_visible(&self) -> bool {
            false
        }
        fn is_audible(&self) -> bool {
            false
        }
        fn time_of_last_completed_navigation(&self) -> Option<Instant> {
            None
        }
        fn schedule_compositing_flush(&self) {
            self.record("schedule_compositing_flush");
        }
    }

    impl PageRegistry for Recorder {
        fn live_pages(&self) -> Vec<Arc<dyn Page>> {
            vec![Arc::new(self.clone())]
        }
    }

    impl MemoryPressureState for Recorder {
        fn is_under_memory_pressure(&self) -> bool {
            self.under_pressure
        }
    }

    impl PlatformHooks for Recorder {
        fn release_memory(&self, _severity: Severity) {
            self.record("platform_release_memory");
        }
    }

    impl AllocatorTrim for Recorder {
        fn release_free_memory(&self) {
            self.record("release_free_memory");
        }
    }

    impl TaskDispatch for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn dispatch(&self, _task: Task) {
            self.record("dispatch_trim");
        }
    }

    const NONCRITICAL: [&str; 6] = [
        "purge_inactive_font_data",
        "clear_width_caches",
        "clear_selector_query_cache",
        "prune_dead_resources",
        "clear_presentation_attribute_cache",
        "clear_inline_style_sheet_cache",
    ];

    const TAIL: [&str; 3] = ["platform_release_memory", "dispatch_trim", "release_free_memory"];

    #[test]
    fn test_noncritical_sequence() {
        for blocking in [Blocking::Synchronous, Blocking::Asynchronous] {
            let recorder = Recorder::default();
            MemoryRelief::new(recorder.services()).release_memory(Severity::Noncritical, blocking);

            let expected: Vec<&str> = NONCRITICAL.iter().chain(TAIL.iter()).copied().collect();
            assert_eq!(recorder.calls(), expected);
        }
    }

    #[test]
    fn test_critical_runs_before_noncritical() {
        let recorder = Recorder {
            paused: true,
            ..Recorder::default()
        };
        MemoryRelief::new(recorder.services()).release_memory(Severity::Critical, Blocking::Synchronous);

        let critical = [
            "page_cache_prune",
            "prune_live_resources",
            "drain_value_pool",
            "clear_style_resolver",
            "delete_compiled_code",
            "purge_buffered_media",
            "collect_now",
            "schedule_compositing_flush",
        ];
        let expected: Vec<&str> = critical
            .iter()
            .chain(NONCRITICAL.iter())
            .chain(TAIL.iter())
            .copied()
            .collect();
        assert_eq!(recorder.calls(), expected);
    }

    #[test]
    fn test_asynchronous_critical_schedules_collection() {
        let recorder = Recorder::default();
        MemoryRelief::new(recorder.services()).release_memory(Severity::Critical, Blocking::Asynchronous);

        let calls = recorder.calls();
        assert!(calls.contains(&"collect_soon"));
        assert!(!calls.contains(&"collect_now"));
        // Playing media keeps its buffers.
        assert!(!calls.contains(&"purge_buffered_media"));
    }

    #[test]
    fn test_pruning_reason_follows_pressure() {
        let suspended = Recorder::default();
        MemoryRelief::new(suspended.services()).release_memory(Severity::Critical, Blocking::Asynchronous);
        assert_eq!(*suspended.reason.lock().unwrap(), Some(PruningReason::ProcessSuspended));

        let pressured = Recorder {
            under_pressure: true,
            ..Recorder::default()
        };
        MemoryRelief::new(pressured.services()).release_memory(Severity::Critical, Blocking::Asynchronous);
        assert_eq!(*pressured.reason.lock().unwrap(), Some(PruningReason::MemoryPressure));
    }

    #[test]
    fn test_listeners_receive_severity() {
        let relief = MemoryRelief::new(ReliefServices::detached());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        relief.subscribe(Arc::new(move |severity| sink.lock().unwrap().push(severity)));

        relief.release_memory(Severity::Noncritical, Blocking::Asynchronous);
        relief.release_memory(Severity::Critical, Blocking::Synchronous);

        assert_eq!(*seen.lock().unwrap(), vec![Severity::Noncritical, Severity::Critical]);
    }

    #[test]
    fn test_platform_passthrough_hooks() {
        struct Counting(AtomicUsize);

        impl PlatformHooks for Counting {
            fn jettison_expensive_objects_on_top_level_navigation(&self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
            fn register_memory_release_notify_callbacks(&self) {
                self.0.fetch_add(10, Ordering::Relaxed);
            }
        }

        let platform = Arc::new(Counting(AtomicUsize::new(0)));
        let relief = MemoryRelief::new(ReliefServices::detached().with_platform(platform.clone()));
        relief.jettison_expensive_objects_on_top_level_navigation();
        relief.register_memory_release_notify_callbacks();

        assert_eq!(platform.0.load(Ordering::Relaxed), 11);
    }

    #[test]
    fn test_configured_navigation_window() {
        use crate::pages::{PageSet, PageState};

        let navigated = Instant::now();
        let page = Arc::new(PageState::new());
        page.set_last_navigation(navigated);
        let pages = Arc::new(PageSet::new());
        pages.register(page);

        let config = ReliefConfig {
            recent_navigation_window_secs: 60,
            ..ReliefConfig::default()
        };
        let relief = MemoryRelief::with_config(ReliefServices::detached().with_pages(pages), &config);

        assert!(!relief.kill_eligibility_at(navigated + Duration::from_secs(30)).is_eligible());
        assert!(relief.kill_eligibility_at(navigated + Duration::from_secs(61)).is_eligible());
    }

    #[test]
    fn test_ineligible_process_reports_reasons() {
        use crate::pages::{PageSet, PageState};

        let page = Arc::new(PageState::new());
        page.set_visible(true);
        page.set_audible(true);
        let pages = Arc::new(PageSet::new());
        pages.register(page);
        let relief = MemoryRelief::new(ReliefServices::detached().with_pages(pages));

        assert!(!relief.process_is_eligible_for_memory_kill());
        assert_eq!(
            relief.kill_eligibility_at(Instant::now()).reasons(),
            vec!["has visible pages", "has audible pages"]
        );
    }
}
