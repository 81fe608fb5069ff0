//! Instrumented global allocator.
//!
//! Wraps the system allocator and keeps running totals so the agent can
//! report its own heap behavior as gauges. The binary installs it with:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: CountingAllocator = CountingAllocator::new();
//! ```
//!
//! Counters are process-wide statics so [`snapshot`] works without a handle
//! to the allocator instance. All updates use relaxed ordering; the numbers
//! feed periodic sampling, not synchronization.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATED_BYTES: AtomicU64 = AtomicU64::new(0);
static FREED_BYTES: AtomicU64 = AtomicU64::new(0);
static ALLOC_CALLS: AtomicU64 = AtomicU64::new(0);
static FREE_CALLS: AtomicU64 = AtomicU64::new(0);
static REALLOC_CALLS: AtomicU64 = AtomicU64::new(0);
static PEAK_LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
static LARGEST_ALLOC: AtomicU64 = AtomicU64::new(0);

/// Point-in-time view of the allocator counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocSnapshot {
    /// Bytes handed out since process start
    pub allocated_bytes: u64,
    /// Bytes returned since process start
    pub freed_bytes: u64,
    /// Bytes currently live (`allocated - freed`)
    pub live_bytes: u64,
    /// High-water mark of live bytes
    pub peak_live_bytes: u64,
    /// Number of allocation calls
    pub alloc_calls: u64,
    /// Number of deallocation calls
    pub free_calls: u64,
    /// Number of reallocation calls
    pub realloc_calls: u64,
    /// Live allocations (`alloc_calls - free_calls`)
    pub live_objects: u64,
    /// Largest single allocation observed
    pub largest_alloc: u64,
}

/// Read the current counters.
pub fn snapshot() -> AllocSnapshot {
    let allocated = ALLOCATED_BYTES.load(Ordering::Relaxed);
    let freed = FREED_BYTES.load(Ordering::Relaxed);
    let alloc_calls = ALLOC_CALLS.load(Ordering::Relaxed);
    let free_calls = FREE_CALLS.load(Ordering::Relaxed);

    AllocSnapshot {
        allocated_bytes: allocated,
        freed_bytes: freed,
        live_bytes: allocated.saturating_sub(freed),
        peak_live_bytes: PEAK_LIVE_BYTES.load(Ordering::Relaxed),
        alloc_calls,
        free_calls,
        realloc_calls: REALLOC_CALLS.load(Ordering::Relaxed),
        live_objects: alloc_calls.saturating_sub(free_calls),
        largest_alloc: LARGEST_ALLOC.load(Ordering::Relaxed),
    }
}

fn record_alloc(size: u64) {
    ALLOC_CALLS.fetch_add(1, Ordering::Relaxed);
    let allocated = ALLOCATED_BYTES.fetch_add(size, Ordering::Relaxed) + size;
    let live = allocated.saturating_sub(FREED_BYTES.load(Ordering::Relaxed));
    PEAK_LIVE_BYTES.fetch_max(live, Ordering::Relaxed);
    LARGEST_ALLOC.fetch_max(size, Ordering::Relaxed);
}

fn record_free(size: u64) {
    FREE_CALLS.fetch_add(1, Ordering::Relaxed);
    FREED_BYTES.fetch_add(size, Ordering::Relaxed);
}

/// System allocator wrapper that feeds the counters above.
pub struct CountingAllocator {
    inner: System,
}

impl CountingAllocator {
    pub const fn new() -> Self {
        Self { inner: System }
    }
}

impl Default for CountingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: delegates every operation to the system allocator unchanged;
// bookkeeping only touches atomics.
unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if !ptr.is_null() {
            record_alloc(layout.size() as u64);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout);
        record_free(layout.size() as u64);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            REALLOC_CALLS.fetch_add(1, Ordering::Relaxed);
            record_free(layout.size() as u64);
            record_alloc(new_size as u64);
        }
        new_ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        if !ptr.is_null() {
            record_alloc(layout.size() as u64);
        }
        ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_internally_consistent() {
        // The counting allocator is not installed in unit tests, so the
        // counters only move if some other test in this process touched
        // them. Consistency must hold either way.
        let s = snapshot();
        assert_eq!(s.live_bytes, s.allocated_bytes.saturating_sub(s.freed_bytes));
        assert_eq!(s.live_objects, s.alloc_calls.saturating_sub(s.free_calls));
        assert!(s.peak_live_bytes >= s.live_bytes || s.peak_live_bytes == 0);
    }

    #[test]
    fn manual_records_move_the_counters() {
        let before = snapshot();
        record_alloc(128);
        record_free(64);
        let after = snapshot();
        assert_eq!(after.allocated_bytes - before.allocated_bytes, 128);
        assert_eq!(after.freed_bytes - before.freed_bytes, 64);
        assert!(after.largest_alloc >= 128);
    }
}
