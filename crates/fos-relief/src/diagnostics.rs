//! Memory statistics logged when the process gives up on recovery.
//!
//! Collection is best-effort: any figure a collaborator cannot provide, or
//! panics while providing, is left out of the report.

use crate::platform::MemoryCategoryUsage;
use crate::services::ReliefServices;
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

/// Script heap figures reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeapStatistics {
    pub heap_size: usize,
    pub extra_memory_size: usize,
    /// Not every engine tracks memory held outside the heap.
    pub external_memory_size: Option<usize>,
    pub global_object_count: usize,
    /// Live script objects by type name.
    pub object_type_counts: BTreeMap<String, usize>,
}

/// Everything known about memory at the time of a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStatistics {
    /// Non-empty categories only.
    pub categories: Vec<MemoryCategoryUsage>,
    pub heap: Option<HeapStatistics>,
    /// Live pages, utility pages excluded.
    pub page_count: Option<usize>,
    pub document_count: Option<usize>,
}

impl MemoryStatistics {
    pub fn collect(services: &ReliefServices) -> Self {
        let categories = best_effort("memory breakdown", || services.platform.memory_breakdown())
            .unwrap_or_default()
            .into_iter()
            .filter(|category| category.bytes > 0)
            .collect();

        let heap = best_effort("heap statistics", || services.script_engine.heap_statistics());

        let page_count = best_effort("page count", || {
            Some(
                services
                    .pages
                    .live_pages()
                    .iter()
                    .filter(|page| !page.is_utility_page())
                    .count(),
            )
        });

        let document_count = best_effort("document count", || {
            Some(services.documents.live_documents().len())
        });

        Self {
            categories,
            heap,
            page_count,
            document_count,
        }
    }

    /// Write the report to the log, one figure per line.
    pub fn log(&self) {
        if !self.categories.is_empty() {
            error!("Memory per category at time of death:");
            for category in &self.categories {
                error!("{:>16}: {}", category.name, format_bytes(category.bytes as usize));
            }
        }

        error!("Memory usage statistics at time of death:");
        if let Some(heap) = &self.heap {
            error!("GC heap size: {}", heap.heap_size);
            error!("GC heap extra memory size: {}", heap.extra_memory_size);
            if let Some(external) = heap.external_memory_size {
                error!("GC heap external memory: {}", external);
            }
            error!("Global object count: {}", heap.global_object_count);
        }
        if let Some(count) = self.page_count {
            error!("Page count: {}", count);
        }
        if let Some(count) = self.document_count {
            error!("Document count: {}", count);
        }
        if let Some(heap) = &self.heap {
            error!("Live JavaScript objects:");
            for (type_name, count) in &heap.object_type_counts {
                error!("  {}: {}", type_name, count);
            }
        }
    }
}

fn best_effort<T>(what: &str, collect: impl FnOnce() -> Option<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(collect)) {
        Ok(value) => value,
        Err(_) => {
            warn!("Skipping {}: collaborator panicked", what);
            None
        }
    }
}

/// Format memory size for display.
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
