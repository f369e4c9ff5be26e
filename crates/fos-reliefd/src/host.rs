//! Pressure policy
//!
//! Turns RSS monitor level changes into relief passes, and gives up on the
//! process when a critical pass cannot bring it back under the limit.

use fos_relief::{Blocking, MemoryPressureLevel, MemoryRelief, RssMonitor, Severity};
use std::sync::Arc;
use tracing::{info, warn};

/// Level change reported by the RSS monitor thread
#[derive(Debug, Clone, Copy)]
pub struct PressureEvent {
    pub level: MemoryPressureLevel,
    pub rss: usize,
}

/// Relief pass for a pressure level, if any.
pub fn relief_for(level: MemoryPressureLevel) -> Option<(Severity, Blocking)> {
    match level {
        MemoryPressureLevel::Low | MemoryPressureLevel::Medium => None,
        MemoryPressureLevel::High => Some((Severity::Noncritical, Blocking::Asynchronous)),
        MemoryPressureLevel::Critical => Some((Severity::Critical, Blocking::Synchronous)),
    }
}

pub struct Host {
    relief: MemoryRelief,
    monitor: Arc<RssMonitor>,
    terminate_on_failed_recovery: bool,
}

impl Host {
    pub fn new(
        relief: MemoryRelief,
        monitor: Arc<RssMonitor>,
        terminate_on_failed_recovery: bool,
    ) -> Self {
        Self {
            relief,
            monitor,
            terminate_on_failed_recovery,
        }
    }

    #[cfg(test)]
    pub fn relief(&self) -> &MemoryRelief {
        &self.relief
    }

    pub fn handle(&self, event: PressureEvent) {
        let Some((severity, blocking)) = relief_for(event.level) else {
            return;
        };

        info!(
            level = event.level.description(),
            rss = event.rss,
            "Releasing memory ({severity}, {blocking})"
        );
        self.relief.release_memory(severity, blocking);

        if !severity.is_critical() {
            return;
        }

        match RssMonitor::read_rss_sync() {
            Ok(rss) => {
                self.monitor.record_sample(rss);
            }
            Err(e) => warn!("Could not re-sample RSS after relief: {}", e),
        }

        if self.should_terminate(self.monitor.is_over_critical_limit()) {
            self.relief.did_exceed_memory_limit_and_failed_to_recover();
        }
    }

    fn should_terminate(&self, still_over_limit: bool) -> bool {
        still_over_limit
            && self.terminate_on_failed_recovery
            && self.relief.process_is_eligible_for_memory_kill()
    }
}
