//! General-purpose fallback policy.
//!
//! Requests the size-class router cannot place in a fixed pool land here.
//! Blocks come straight from the Rust global allocator with a word-aligned
//! layout, so the policy is stateless, `Sync`, and has nothing to clear.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use super::{AllocPolicy, MIN_ALIGN};

/// Policy backed by the global allocator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemPolicy;

impl SystemPolicy {
    /// Layout used for a `size`-byte block; `None` if `size` is zero or too
    /// large to describe.
    fn layout(size: usize) -> Option<Layout> {
        if size == 0 {
            return None;
        }
        Layout::from_size_align(size, MIN_ALIGN).ok()
    }
}

impl AllocPolicy for SystemPolicy {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let layout = Self::layout(size)?;
        // SAFETY: layout has non-zero size.
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = Self::layout(size) {
            // SAFETY: caller guarantees `ptr` came from `alloc(size)`, which
            // used this exact layout.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }

    fn clear(&self) {}
}
