//! Typed allocator over a policy.
//!
//! [`PolicyAllocator<T, P>`] turns raw byte requests into element requests
//! for generic containers: allocate and deallocate `count` elements, build and
//! destroy values in place, and rebind to another element type over the same
//! policy state.
//!
//! All adapters over the same policy type compare equal, whatever their
//! element types, because blocks are interchangeable between instances of one
//! policy type. Memory from one may be released through the other.
//!
//! Zero-sized element types never reach the policy.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use crate::error::{AllocError, AllocResult};
use crate::policy::AllocPolicy;

pub struct PolicyAllocator<T, P> {
    policy: P,
    _marker: PhantomData<fn() -> T>,
}

impl<T, P> PolicyAllocator<T, P> {
    pub const fn new(policy: P) -> Self {
        Self {
            policy,
            _marker: PhantomData,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn into_policy(self) -> P {
        self.policy
    }

    /// Largest element count a single request can describe.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        match size_of::<T>() {
            0 => usize::MAX,
            elem => usize::MAX / elem,
        }
    }

    /// Same policy state, different element type.
    pub fn rebind<U>(self) -> PolicyAllocator<U, P> {
        PolicyAllocator::new(self.policy)
    }
}

impl<T, P: AllocPolicy> PolicyAllocator<T, P> {
    /// Storage for `count` elements, or `None`.
    ///
    /// `None` covers `count == 0`, counts past [`max_size`](Self::max_size),
    /// element alignment beyond the policy's guarantee and policy failure.
    /// Nothing is reserved when `None` is returned.
    #[inline]
    pub fn allocate(&self, count: usize) -> Option<NonNull<T>> {
        self.try_allocate(count).ok()
    }

    /// Like [`allocate`](Self::allocate), reporting why a request failed.
    pub fn try_allocate(&self, count: usize) -> AllocResult<NonNull<T>> {
        if count == 0 {
            return Err(AllocError::ZeroSized);
        }
        let elem_size = size_of::<T>();
        if elem_size == 0 {
            return Ok(NonNull::dangling());
        }
        if align_of::<T>() > P::ALIGN {
            return Err(AllocError::UnsupportedAlignment {
                align: align_of::<T>(),
                guaranteed: P::ALIGN,
            });
        }
        let size = count
            .checked_mul(elem_size)
            .ok_or(AllocError::CapacityOverflow { count, elem_size })?;
        self.policy
            .alloc(size)
            .map(NonNull::cast)
            .ok_or(AllocError::Exhausted { size })
    }

    /// Returns storage for `count` elements.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate(count)` on this adapter or an equal one,
    /// with the same `count`, and any values in it must already be destroyed
    /// or moved out.
    #[inline]
    pub unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) {
        let elem_size = size_of::<T>();
        if elem_size == 0 || count == 0 {
            return;
        }
        // SAFETY: caller guarantees `ptr` came from `alloc(count * elem_size)`,
        // which could not have overflowed.
        unsafe { self.policy.free(ptr.cast(), count * elem_size) }
    }
}

impl<T, P> PolicyAllocator<T, P> {
    /// Moves `value` into uninitialized storage.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and properly aligned; whatever it held
    /// is overwritten without being dropped.
    #[inline]
    pub unsafe fn construct(&self, ptr: NonNull<T>, value: T) {
        // SAFETY: guaranteed by the caller.
        unsafe { ptr.write(value) }
    }

    /// Builds a value in place with a fallible constructor.
    ///
    /// The constructor's error comes back unchanged and the storage stays
    /// allocated and uninitialized.
    ///
    /// # Safety
    ///
    /// Same as [`construct`](Self::construct).
    pub unsafe fn construct_with<E>(
        &self,
        ptr: NonNull<T>,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<(), E> {
        let value = f()?;
        // SAFETY: guaranteed by the caller.
        unsafe { ptr.write(value) };
        Ok(())
    }

    /// Runs the destructor of the value at `ptr`, leaving the storage
    /// allocated.
    ///
    /// # Safety
    ///
    /// `ptr` must hold an initialized value that is not used afterwards.
    #[inline]
    pub unsafe fn destroy(&self, ptr: NonNull<T>) {
        // SAFETY: guaranteed by the caller.
        unsafe { ptr.drop_in_place() }
    }
}

impl<T, P: Default> Default for PolicyAllocator<T, P> {
    fn default() -> Self {
        Self::new(P::default())
    }
}

impl<T, P: Clone> Clone for PolicyAllocator<T, P> {
    fn clone(&self) -> Self {
        Self::new(self.policy.clone())
    }
}

impl<T, U, P: Clone> From<&PolicyAllocator<U, P>> for PolicyAllocator<T, P> {
    fn from(other: &PolicyAllocator<U, P>) -> Self {
        Self::new(other.policy.clone())
    }
}

impl<T, U, P> PartialEq<PolicyAllocator<U, P>> for PolicyAllocator<T, P> {
    fn eq(&self, _other: &PolicyAllocator<U, P>) -> bool {
        true
    }
}

impl<T, P> Eq for PolicyAllocator<T, P> {}

impl<T, P: std::fmt::Debug> std::fmt::Debug for PolicyAllocator<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyAllocator")
            .field("elem", &std::any::type_name::<T>())
            .field("policy", &self.policy)
            .finish()
    }
}
