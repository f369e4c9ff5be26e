//! fos-reliefd: memory relief host process
//!
//! Initializes the global allocator, sets up logging, wires the caches and
//! script heap into memory relief, then feeds RSS pressure changes into it.
//!
//! Usage: `fos-reliefd [config.toml] [--dump-stats]`

mod host;

use anyhow::{Context, Result};
use crossbeam_channel::unbounded;
use fos_js::{GcController, GcPolicy, HeapLimits, JsHeap};
use fos_relief::{
    BackForwardCache, DecodedResourceCache, GlyphCache, MemoryRelief, MimallocTrim, PageSet,
    ReliefConfig, ReliefServices, RssMonitor, SysinfoPlatform, TaskDispatch, WorkerThread,
};
use host::{Host, PressureEvent};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator so trims reach the allocator in use
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Back/forward cache capacity in pages
const PAGE_CACHE_CAPACITY: usize = 4;

fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let mut config_path = None;
    let mut dump_stats = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--dump-stats" => dump_stats = true,
            _ => config_path = Some(arg),
        }
    }

    let config = match &config_path {
        Some(path) => ReliefConfig::load(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => ReliefConfig::default(),
    };

    info!("fos-reliefd starting...");
    info!("Using mimalloc allocator");

    let heap_thread: Arc<dyn TaskDispatch> = Arc::new(WorkerThread::spawn("js-heap")?);
    let script_engine = GcController::with_dispatcher(
        JsHeap::new(HeapLimits::default()),
        GcPolicy {
            coalesce_interval: config.gc_coalesce_interval(),
        },
        heap_thread,
    );

    let (tx, rx) = unbounded();
    let mut monitor = RssMonitor::new(config.monitor.clone());
    monitor.on_pressure_change(move |level, rss| {
        let _ = tx.send(PressureEvent { level, rss });
    });
    let monitor = Arc::new(monitor);

    let mut services = ReliefServices::detached()
        .with_font_cache(Arc::new(GlyphCache::new(config.font_inactivity())))
        .with_page_cache(Arc::new(BackForwardCache::new(PAGE_CACHE_CAPACITY)))
        .with_resource_cache(Arc::new(DecodedResourceCache::new()))
        .with_script_engine(script_engine.clone())
        .with_pages(Arc::new(PageSet::new()))
        .with_pressure(monitor.clone())
        .with_platform(Arc::new(SysinfoPlatform))
        .with_allocator(Arc::new(MimallocTrim));
    for name in &config.dedicated_threads {
        services = services.with_dedicated_thread(Arc::new(WorkerThread::spawn(name.clone())?));
    }

    let relief = MemoryRelief::with_config(services, &config);

    if dump_stats {
        println!("{}", serde_json::to_string_pretty(&relief.memory_statistics())?);
        return Ok(());
    }

    relief.register_memory_release_notify_callbacks();

    let host = Host::new(relief, monitor.clone(), config.terminate_on_failed_recovery);
    let _monitor_thread = monitor.start()?;

    for event in rx.iter() {
        host.handle(event);
    }

    info!("fos-reliefd shutting down: {}", script_engine.stats().format());
    Ok(())
}
