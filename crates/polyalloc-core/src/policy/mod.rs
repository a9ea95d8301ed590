//! The allocation policy contract and the reference policies.
//!
//! Every wrapper in this crate both consumes and implements [`AllocPolicy`],
//! so anything satisfying it can sit at any layer of a stack.

use std::ptr::NonNull;
use std::sync::Arc;

pub mod fixed;
pub mod locked;
pub mod system;
pub mod tracked;

/// Alignment every reference policy guarantees: one machine word.
pub const MIN_ALIGN: usize = std::mem::align_of::<usize>();

/// Raw allocate/free/clear capability.
///
/// Methods take `&self`; a policy that needs mutable state uses interior
/// mutability. Policies are not required to be `Sync`: sharing one instance
/// across threads is opted into through the type system (for example with
/// [`Locked`](crate::Locked)) or avoided entirely with
/// [`ThreadCached`](crate::ThreadCached).
///
/// Blocks are interchangeable between instances of the same policy type and
/// configuration: a block obtained from one instance may be freed into
/// another. This is what lets a block allocated on one thread be released on
/// a different thread's cached instance, and what makes two adapters over the
/// same policy type compare equal.
pub trait AllocPolicy {
    /// Alignment satisfied by every block this policy returns.
    const ALIGN: usize = MIN_ALIGN;

    /// Returns a block of at least `size` bytes, or `None` on failure or when
    /// `size == 0`.
    fn alloc(&self, size: usize) -> Option<NonNull<u8>>;

    /// Returns a block to the policy.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `alloc(size)` on this policy, or on an
    /// interchangeable instance, with exactly the same `size`, and must not
    /// have been freed since. Passing any other size is undefined behaviour;
    /// it is not detected.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);

    /// Releases whatever memory the policy holds cached but unused.
    fn clear(&self);
}

impl<P: AllocPolicy> AllocPolicy for &P {
    const ALIGN: usize = P::ALIGN;

    #[inline]
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).alloc(size)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr, size) }
    }

    #[inline]
    fn clear(&self) {
        (**self).clear()
    }
}

impl<P: AllocPolicy> AllocPolicy for Arc<P> {
    const ALIGN: usize = P::ALIGN;

    #[inline]
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).alloc(size)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr, size) }
    }

    #[inline]
    fn clear(&self) {
        (**self).clear()
    }
}

impl<P: AllocPolicy> AllocPolicy for Box<P> {
    const ALIGN: usize = P::ALIGN;

    #[inline]
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        (**self).alloc(size)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { (**self).free(ptr, size) }
    }

    #[inline]
    fn clear(&self) {
        (**self).clear()
    }
}
