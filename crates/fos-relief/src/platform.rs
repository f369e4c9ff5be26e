//! Platform capability hooks.
//!
//! Platforms without special handling use the default no-op methods.

use crate::types::Severity;
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Resident memory attributed to one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryCategoryUsage {
    pub name: String,
    pub bytes: u64,
}

impl MemoryCategoryUsage {
    pub fn new(name: impl Into<String>, bytes: u64) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// Per-platform extension points of memory relief.
pub trait PlatformHooks: Send + Sync {
    /// Extra release work after the shared relief sequences.
    fn release_memory(&self, _severity: Severity) {}

    /// Per-category memory breakdown for diagnostics.
    fn memory_breakdown(&self) -> Option<Vec<MemoryCategoryUsage>> {
        None
    }

    /// Drop objects that are expensive to keep across a top-level navigation.
    fn jettison_expensive_objects_on_top_level_navigation(&self) {}

    /// Register with OS memory notifications.
    fn register_memory_release_notify_callbacks(&self) {}
}

/// Reports process memory through `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoPlatform;

impl PlatformHooks for SysinfoPlatform {
    fn memory_breakdown(&self) -> Option<Vec<MemoryCategoryUsage>> {
        let mut system = System::new_with_specifics(RefreshKind::nothing());
        let pid = Pid::from_u32(std::process::id());
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );

        let process = system.process(pid)?;
        Some(vec![
            MemoryCategoryUsage::new("resident", process.memory()),
            MemoryCategoryUsage::new("virtual", process.virtual_memory()),
        ])
    }
}
