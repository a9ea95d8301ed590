//! Mutex around a policy.
//!
//! Makes any `Send` policy shareable between threads, at the price of one
//! lock per call. This is what a process-wide pool family or a singleton over
//! a single-owner policy needs.

use std::ptr::NonNull;

use parking_lot::{Mutex, MutexGuard};

use super::AllocPolicy;
use super::fixed::FixedSize;

/// A policy serialized behind a `parking_lot::Mutex`.
#[derive(Debug, Default)]
pub struct Locked<P> {
    inner: Mutex<P>,
}

impl<P> Locked<P> {
    pub const fn new(policy: P) -> Self {
        Self {
            inner: Mutex::new(policy),
        }
    }

    /// Locks and exposes the inner policy.
    pub fn lock(&self) -> MutexGuard<'_, P> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> P {
        self.inner.into_inner()
    }
}

impl<P: AllocPolicy> AllocPolicy for Locked<P> {
    const ALIGN: usize = P::ALIGN;

    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.inner.lock().alloc(size)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().free(ptr, size) }
    }

    fn clear(&self) {
        self.inner.lock().clear()
    }
}

impl<P: FixedSize> FixedSize for Locked<P> {
    fn with_block_size(block_size: usize) -> Self {
        Self::new(P::with_block_size(block_size))
    }

    fn block_size(&self) -> usize {
        self.inner.lock().block_size()
    }
}
