//! Allocator free-list trimming.

use tracing::debug;

/// Returns cached free memory held by the allocator to the OS.
///
/// Thread-local caches can only be released from their owning thread, so
/// implementations act on the calling thread's state plus whatever is shared.
pub trait AllocatorTrim: Send + Sync {
    fn release_free_memory(&self);
}

/// Trims the mimalloc heap of the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct MimallocTrim;

impl AllocatorTrim for MimallocTrim {
    fn release_free_memory(&self) {
        debug!(
            thread = std::thread::current().name().unwrap_or("unnamed"),
            "Releasing free allocator memory"
        );
        // SAFETY: mi_collect only walks the calling thread's heap and the
        // shared segment cache; it has no preconditions on the caller.
        unsafe { libmimalloc_sys::mi_collect(true) };
    }
}
