//! End-to-end relief passes over the in-process collaborators.

use fos_relief::{
    BackForwardCache, Blocking, CachedPage, DecodedResourceCache, GlyphCache, MemoryRelief,
    PageCache, PageId, PageSet, PageState, PressureFlag, ReliefServices, ResourceCache, Severity,
    TaskDispatch, WorkerThread,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn critical_synchronous_empties_page_and_resource_caches() {
    init_logging();

    let page_cache = Arc::new(BackForwardCache::new(8));
    for id in 1..=3 {
        page_cache.add(CachedPage {
            page_id: PageId(1000 + id),
            url: format!("https://example.com/{}", id),
            size_bytes: 4096,
        });
    }

    let resources = Arc::new(DecodedResourceCache::new());
    resources.insert("hero.jpg", 20_000, 400_000);
    resources.insert("stale.css", 2_000, 0);
    resources.add_client("hero.jpg");

    let fonts = Arc::new(GlyphCache::new(Duration::from_secs(60)));
    fonts.record_width("Inter", 'x', 6.0);

    let services = ReliefServices::detached()
        .with_page_cache(page_cache.clone())
        .with_resource_cache(resources.clone())
        .with_font_cache(fonts.clone());
    let relief = MemoryRelief::new(services);

    relief.release_memory(Severity::Critical, Blocking::Synchronous);

    assert_eq!(page_cache.size(), 0);
    assert_eq!(resources.size(), 0);
    // Referenced resources stay cached, only their decoded data is gone.
    assert!(resources.contains("hero.jpg"));
    assert!(!resources.contains("stale.css"));
    assert_eq!(fonts.width_count(), 0);
}

#[test]
fn noncritical_keeps_back_forward_cache_and_live_data() {
    init_logging();

    let page_cache = Arc::new(BackForwardCache::new(8));
    page_cache.add(CachedPage {
        page_id: PageId(2000),
        url: "https://example.com/".to_string(),
        size_bytes: 4096,
    });

    let resources = Arc::new(DecodedResourceCache::new());
    resources.insert("live.png", 100, 1000);
    resources.insert("dead.png", 100, 1000);
    resources.add_client("live.png");

    let relief = MemoryRelief::new(
        ReliefServices::detached()
            .with_page_cache(page_cache.clone())
            .with_resource_cache(resources.clone()),
    );
    relief.release_memory(Severity::Noncritical, Blocking::Asynchronous);

    assert_eq!(page_cache.size(), 1);
    assert_eq!(resources.dead_size(), 0);
    assert_eq!(resources.live_decoded_size(), 1000);
}

#[test]
fn noncritical_with_nothing_to_release_notifies_listener() {
    init_logging();

    let relief = MemoryRelief::new(ReliefServices::detached().with_pages(Arc::new(PageSet::new())));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    relief.subscribe(Arc::new(move |severity| sink.lock().unwrap().push(severity)));

    relief.release_memory(Severity::Noncritical, Blocking::Asynchronous);

    assert_eq!(*seen.lock().unwrap(), vec![Severity::Noncritical]);
}

#[test]
fn critical_relief_flushes_every_page() {
    let pages = Arc::new(PageSet::new());
    let visible = Arc::new(PageState::new());
    let utility = Arc::new(PageState::utility());
    pages.register(visible.clone());
    pages.register(utility.clone());

    let relief = MemoryRelief::new(
        ReliefServices::detached()
            .with_pages(pages)
            .with_pressure(Arc::new(PressureFlag::new())),
    );

    relief.release_memory(Severity::Noncritical, Blocking::Synchronous);
    assert_eq!(visible.flush_requests(), 0);

    relief.release_memory(Severity::Critical, Blocking::Synchronous);
    assert_eq!(visible.flush_requests(), 1);
    assert_eq!(utility.flush_requests(), 1);
}

#[test]
fn allocator_trim_reaches_dedicated_thread() {
    struct ThreadRecorder {
        threads: Mutex<Vec<Option<String>>>,
    }

    impl fos_relief::AllocatorTrim for ThreadRecorder {
        fn release_free_memory(&self) {
            let name = std::thread::current().name().map(str::to_string);
            self.threads.lock().unwrap().push(name);
        }
    }

    let trim = Arc::new(ThreadRecorder {
        threads: Mutex::new(Vec::new()),
    });
    let scrolling: Arc<dyn TaskDispatch> = Arc::new(WorkerThread::spawn("scrolling").unwrap());

    let relief = MemoryRelief::new(
        ReliefServices::detached()
            .with_allocator(trim.clone())
            .with_dedicated_thread(scrolling),
    );
    relief.release_memory(Severity::Noncritical, Blocking::Asynchronous);

    // The dedicated thread trims on its own schedule.
    drop(relief);

    let threads = trim.threads.lock().unwrap().clone();
    assert_eq!(threads.len(), 2);
    assert!(threads.contains(&Some("scrolling".to_string())));
}

#[test]
fn utility_page_does_not_block_memory_kill() {
    let base = Instant::now();
    let now = base + Duration::from_secs(2 * 60 * 60);

    let page = Arc::new(PageState::new());
    page.set_last_navigation(base);
    let utility = Arc::new(PageState::utility());
    utility.set_visible(true);
    utility.set_last_navigation(now);

    let pages = Arc::new(PageSet::new());
    pages.register(page);
    pages.register(utility);

    let relief = MemoryRelief::new(ReliefServices::detached().with_pages(pages));
    let eligibility = relief.kill_eligibility_at(now);

    assert!(eligibility.is_eligible());
    assert!(eligibility.reasons().is_empty());
}

#[test]
fn any_user_facing_signal_blocks_memory_kill() {
    let base = Instant::now();
    let now = base + Duration::from_secs(3 * 60 * 60);

    let pages = Arc::new(PageSet::new());
    let quiet = Arc::new(PageState::new());
    let page = Arc::new(PageState::new());
    pages.register(quiet);
    pages.register(page.clone());
    let relief = MemoryRelief::new(ReliefServices::detached().with_pages(pages));

    assert!(relief.kill_eligibility_at(now).is_eligible());

    page.set_visible(true);
    assert!(relief.kill_eligibility_at(now).has_visible_pages);
    page.set_visible(false);

    page.set_audible(true);
    assert!(relief.kill_eligibility_at(now).has_audible_pages);
    page.set_audible(false);

    page.set_last_navigation(now - Duration::from_secs(59 * 60 + 59));
    assert!(!relief.kill_eligibility_at(now).is_eligible());

    page.set_last_navigation(now - Duration::from_secs(60 * 60 + 1));
    assert!(relief.kill_eligibility_at(now).is_eligible());
}
