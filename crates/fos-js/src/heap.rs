//! JavaScript Heap Accounting
//!
//! Tracks what the script heap holds so collection, compiled code
//! jettison and time-of-death diagnostics have real figures to work with.

use fos_relief::HeapStatistics;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Heap size limits
#[derive(Debug, Clone, Copy)]
pub struct HeapLimits {
    /// Maximum heap size (bytes)
    pub max_size: usize,
}

impl HeapLimits {
    /// Create ultra-low memory limits
    pub fn ultra_low() -> Self {
        Self {
            max_size: 16 * 1024 * 1024, // 16 MB
        }
    }

    /// Check if size is within limits
    pub fn is_within_limit(&self, size: usize) -> bool {
        size <= self.max_size
    }
}

impl Default for HeapLimits {
    fn default() -> Self {
        Self::ultra_low()
    }
}

/// Heap errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum HeapError {
    #[error("Out of memory: {requested} bytes requested with {allocated} of {limit} in use")]
    OutOfMemory {
        requested: usize,
        allocated: usize,
        limit: usize,
    },

    #[error("No live {0} objects")]
    NoLiveObjects(String),
}

/// Script heap of one engine instance.
#[derive(Debug, Default)]
pub struct JsHeap {
    limits: HeapLimits,
    /// Bytes in the heap, reachable or not
    allocated: usize,
    /// Unreachable bytes awaiting collection
    garbage: usize,
    /// Memory owned by heap cells but allocated outside the heap
    extra_memory: usize,
    /// ArrayBuffers and other embedder-owned memory
    external_memory: usize,
    compiled_code: usize,
    global_objects: usize,
    object_counts: BTreeMap<String, usize>,
}

impl JsHeap {
    pub fn new(limits: HeapLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn garbage(&self) -> usize {
        self.garbage
    }

    pub fn compiled_code(&self) -> usize {
        self.compiled_code
    }

    /// Record a new live object.
    pub fn record_allocation(&mut self, type_name: &str, size: usize) -> Result<(), HeapError> {
        let new_size = self.allocated + size;
        if !self.limits.is_within_limit(new_size) {
            warn!(
                requested = size,
                allocated = self.allocated,
                limit = self.limits.max_size,
                "Script heap limit exceeded"
            );
            return Err(HeapError::OutOfMemory {
                requested: size,
                allocated: self.allocated,
                limit: self.limits.max_size,
            });
        }

        self.allocated = new_size;
        *self.object_counts.entry(type_name.to_string()).or_insert(0) += 1;
        Ok(())
    }

    /// Record that a live object became unreachable.
    pub fn record_unreachable(&mut self, type_name: &str, size: usize) -> Result<(), HeapError> {
        let count = self
            .object_counts
            .get_mut(type_name)
            .filter(|count| **count > 0)
            .ok_or_else(|| HeapError::NoLiveObjects(type_name.to_string()))?;
        *count -= 1;
        if *count == 0 {
            self.object_counts.remove(type_name);
        }
        self.garbage = (self.garbage + size).min(self.allocated);
        Ok(())
    }

    pub fn record_extra_memory(&mut self, size: usize) {
        self.extra_memory += size;
    }

    pub fn record_external_memory(&mut self, size: usize) {
        self.external_memory += size;
    }

    pub fn record_compiled_code(&mut self, size: usize) {
        self.compiled_code += size;
    }

    pub fn record_global_object(&mut self) {
        self.global_objects += 1;
    }

    /// Sweep unreachable objects. Returns bytes freed.
    pub fn collect(&mut self) -> usize {
        let freed = self.garbage;
        self.allocated -= freed;
        self.garbage = 0;
        debug!(freed, allocated = self.allocated, "Swept script heap");
        freed
    }

    /// Throw away compiled code; it is recompiled on next use.
    pub fn delete_compiled_code(&mut self) -> usize {
        let freed = self.compiled_code;
        self.compiled_code = 0;
        debug!(freed, "Deleted compiled code");
        freed
    }

    pub fn statistics(&self) -> HeapStatistics {
        HeapStatistics {
            heap_size: self.allocated,
            extra_memory_size: self.extra_memory,
            external_memory_size: Some(self.external_memory),
            global_object_count: self.global_objects,
            object_type_counts: self.object_counts.clone(),
        }
    }
}
