//! Usage-counting wrapper.
//!
//! Forwards every call to the inner policy and keeps atomic counters, so it
//! is as thread-safe as the policy it wraps. Failed allocations only bump the
//! failure counter. Used by the leak checks in tests and the stress harness.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::AllocPolicy;

/// Point-in-time copy of a [`Tracked`] policy's counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TrackedStats {
    pub live_blocks: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
    pub allocs: u64,
    pub frees: u64,
    pub failed_allocs: u64,
}

impl TrackedStats {
    /// Every successful allocation has been freed.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.live_blocks == 0 && self.live_bytes == 0 && self.allocs == self.frees
    }
}

/// Policy wrapper that counts blocks and bytes.
#[derive(Debug, Default)]
pub struct Tracked<P> {
    inner: P,
    live_blocks: AtomicUsize,
    live_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    allocs: AtomicU64,
    frees: AtomicU64,
    failed_allocs: AtomicU64,
}

impl<P> Tracked<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            live_blocks: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            failed_allocs: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    #[must_use]
    pub fn stats(&self) -> TrackedStats {
        TrackedStats {
            live_blocks: self.live_blocks.load(Ordering::Acquire),
            live_bytes: self.live_bytes.load(Ordering::Acquire),
            peak_bytes: self.peak_bytes.load(Ordering::Acquire),
            allocs: self.allocs.load(Ordering::Acquire),
            frees: self.frees.load(Ordering::Acquire),
            failed_allocs: self.failed_allocs.load(Ordering::Acquire),
        }
    }
}

impl<P: AllocPolicy> AllocPolicy for Tracked<P> {
    const ALIGN: usize = P::ALIGN;

    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let Some(ptr) = self.inner.alloc(size) else {
            self.failed_allocs.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.allocs.fetch_add(1, Ordering::Relaxed);
        self.live_blocks.fetch_add(1, Ordering::AcqRel);
        let live = self.live_bytes.fetch_add(size, Ordering::AcqRel) + size;
        self.peak_bytes.fetch_max(live, Ordering::AcqRel);
        Some(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.free(ptr, size) };
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.live_blocks.fetch_sub(1, Ordering::AcqRel);
        self.live_bytes.fetch_sub(size, Ordering::AcqRel);
    }

    fn clear(&self) {
        self.inner.clear()
    }
}
