//! Garbage Collection Controller
//!
//! Serves the two kinds of collection requests memory relief makes:
//!
//! ```text
//! collect_now ───────────────────────────────▶ full pass, always
//!
//! collect_soon_if_not_done_recently
//!     │
//!     ├── pass already scheduled? ── yes ──▶ coalesce
//!     ├── last pass too recent?  ── yes ──▶ coalesce
//!     ▼
//! schedule ──▶ heap thread (if attached) ──▶ run_scheduled
//!          └─▶ otherwise pending until the owner calls run_scheduled
//! ```

use crate::heap::JsHeap;
use fos_relief::{HeapStatistics, ScriptEngine, TaskDispatch};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// GC policy configuration
#[derive(Debug, Clone)]
pub struct GcPolicy {
    /// A scheduled request within this interval of the last pass is coalesced
    pub coalesce_interval: Duration,
}

impl Default for GcPolicy {
    fn default() -> Self {
        Self {
            coalesce_interval: Duration::from_secs(1),
        }
    }
}

/// Why a pass ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GcReason {
    /// Caller is blocked waiting for the pass
    Synchronous,
    /// Scheduled earlier and run when the heap got to it
    Scheduled,
}

/// GC run statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcStats {
    /// Total passes run
    pub total_runs: u64,
    pub synchronous_runs: u64,
    pub scheduled_runs: u64,
    /// Requests that scheduled a pass
    pub scheduled_requests: u64,
    /// Requests folded into a recent or pending pass
    pub coalesced_requests: u64,
    pub total_pause_time: Duration,
    pub max_pause_time: Duration,
    pub total_freed: u64,
    /// Compiled code jettisons, and the ones skipped mid-collection
    pub code_deletions: u64,
    pub code_deletions_skipped: u64,
}

impl GcStats {
    /// Average pause time
    pub fn average_pause(&self) -> Duration {
        if self.total_runs == 0 {
            Duration::ZERO
        } else {
            self.total_pause_time / self.total_runs as u32
        }
    }

    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "GC: {} runs ({} sync, {} coalesced requests), {:.2}ms avg pause, {:.2}MB freed",
            self.total_runs,
            self.synchronous_runs,
            self.coalesced_requests,
            self.average_pause().as_secs_f64() * 1000.0,
            self.total_freed as f64 / (1024.0 * 1024.0)
        )
    }
}

/// Owns a script heap and decides when it is collected.
pub struct GcController {
    heap: Mutex<JsHeap>,
    policy: GcPolicy,
    last_gc: Mutex<Option<Instant>>,
    scheduled: AtomicBool,
    /// Passes running or waiting for the heap
    passes_in_flight: AtomicUsize,
    stats: Mutex<GcStats>,
    dispatcher: Option<Arc<dyn TaskDispatch>>,
    this: Weak<GcController>,
}

impl GcController {
    /// Scheduled passes wait for [`run_scheduled`](Self::run_scheduled).
    pub fn new(heap: JsHeap, policy: GcPolicy) -> Arc<Self> {
        Self::build(heap, policy, None)
    }

    /// Scheduled passes are posted to the heap's own thread.
    pub fn with_dispatcher(
        heap: JsHeap,
        policy: GcPolicy,
        dispatcher: Arc<dyn TaskDispatch>,
    ) -> Arc<Self> {
        Self::build(heap, policy, Some(dispatcher))
    }

    fn build(
        heap: JsHeap,
        policy: GcPolicy,
        dispatcher: Option<Arc<dyn TaskDispatch>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            heap: Mutex::new(heap),
            policy,
            last_gc: Mutex::new(None),
            scheduled: AtomicBool::new(false),
            passes_in_flight: AtomicUsize::new(0),
            stats: Mutex::new(GcStats::default()),
            dispatcher,
            this: this.clone(),
        })
    }

    /// Lock the heap to record allocations.
    pub fn heap(&self) -> MutexGuard<'_, JsHeap> {
        self.heap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> GcStats {
        self.lock_stats().clone()
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    pub fn is_collecting(&self) -> bool {
        self.passes_in_flight.load(Ordering::Acquire) > 0
    }

    /// Run the scheduled pass, if any. Returns whether a pass ran.
    pub fn run_scheduled(&self) -> bool {
        if !self.scheduled.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.collect(GcReason::Scheduled);
        true
    }

    fn collect(&self, reason: GcReason) {
        self.passes_in_flight.fetch_add(1, Ordering::AcqRel);
        let start = Instant::now();
        let freed = self.heap().collect();
        let pause_time = start.elapsed();
        self.passes_in_flight.fetch_sub(1, Ordering::AcqRel);

        *self.last_gc.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());

        let mut stats = self.lock_stats();
        stats.total_runs += 1;
        stats.total_freed += freed as u64;
        stats.total_pause_time += pause_time;
        if pause_time > stats.max_pause_time {
            stats.max_pause_time = pause_time;
        }
        match reason {
            GcReason::Synchronous => stats.synchronous_runs += 1,
            GcReason::Scheduled => stats.scheduled_runs += 1,
        }

        info!(
            "GC complete: freed {:.2}MB in {:.2}ms (reason: {:?})",
            freed as f64 / (1024.0 * 1024.0),
            pause_time.as_secs_f64() * 1000.0,
            reason
        );
    }

    fn done_recently(&self) -> bool {
        self.last_gc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|last| last.elapsed() < self.policy.coalesce_interval)
    }

    fn lock_stats(&self) -> MutexGuard<'_, GcStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScriptEngine for GcController {
    fn delete_compiled_code_if_not_collecting(&self) {
        if self.is_collecting() {
            debug!("Collection in progress, keeping compiled code");
            self.lock_stats().code_deletions_skipped += 1;
            return;
        }
        self.heap().delete_compiled_code();
        self.lock_stats().code_deletions += 1;
    }

    fn collect_now(&self) {
        // A blocking pass satisfies any pending one.
        self.scheduled.store(false, Ordering::Release);
        self.collect(GcReason::Synchronous);
    }

    fn collect_soon_if_not_done_recently(&self) {
        if self.done_recently() || self.scheduled.swap(true, Ordering::AcqRel) {
            debug!("Coalescing collection request");
            self.lock_stats().coalesced_requests += 1;
            return;
        }
        self.lock_stats().scheduled_requests += 1;

        if let Some(dispatcher) = &self.dispatcher {
            let this = self.this.clone();
            dispatcher.dispatch(Box::new(move || {
                if let Some(gc) = this.upgrade() {
                    gc.run_scheduled();
                }
            }));
        }
    }

    fn heap_statistics(&self) -> Option<HeapStatistics> {
        Some(self.heap().statistics())
    }
}
