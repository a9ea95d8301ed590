//! Process-wide policy instance.
//!
//! A [`Singleton`] is meant to live in a `static`. Its policy is built on
//! first use from any thread, exactly once, and is never dropped. Calls go
//! straight to the instance, so the policy must be `Sync` on its own (wrap a
//! single-owner policy in [`Locked`](crate::Locked)).
//!
//! ```
//! use polyalloc_core::{AllocPolicy, Singleton, Tracked, SystemPolicy};
//!
//! static GLOBAL: Singleton<Tracked<SystemPolicy>> = Singleton::new();
//!
//! let ptr = GLOBAL.alloc(32).unwrap();
//! unsafe { GLOBAL.free(ptr, 32) };
//! assert!(GLOBAL.instance().stats().is_balanced());
//! ```

use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::error::AllocError;
use crate::policy::AllocPolicy;

/// Lazily initialized, never destroyed policy holder.
pub struct Singleton<P> {
    cell: OnceLock<P>,
    init: fn() -> P,
}

impl<P: Default> Singleton<P> {
    /// Holder that default-constructs `P` on first use.
    pub const fn new() -> Self {
        Self::with_init(P::default)
    }
}

impl<P> Singleton<P> {
    /// Holder that builds `P` with `init` on first use.
    pub const fn with_init(init: fn() -> P) -> Self {
        Self {
            cell: OnceLock::new(),
            init,
        }
    }

    /// The instance, built now if this is the first use.
    #[inline]
    pub fn instance(&self) -> &P {
        self.cell.get_or_init(self.init)
    }

    /// Installs `policy` as the instance.
    ///
    /// Fails with [`AllocError::AlreadyInitialized`] if an instance already
    /// exists, whether from an earlier `init` or from first use; `policy` is
    /// dropped in that case.
    pub fn init(&self, policy: P) -> Result<&P, AllocError> {
        self.cell
            .set(policy)
            .map_err(|_| AllocError::AlreadyInitialized)?;
        Ok(self.instance())
    }

    /// The instance if it has been built.
    pub fn get(&self) -> Option<&P> {
        self.cell.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<P: Default> Default for Singleton<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: AllocPolicy> AllocPolicy for Singleton<P> {
    const ALIGN: usize = P::ALIGN;

    #[inline]
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.instance().alloc(size)
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.instance().free(ptr, size) }
    }

    fn clear(&self) {
        self.instance().clear()
    }
}

impl<P: std::fmt::Debug> std::fmt::Debug for Singleton<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Singleton").field("instance", &self.get()).finish()
    }
}

/// Declares a zero-sized handle type forwarding to a static [`Singleton`].
///
/// The handle is `Default + Copy + Eq`, so a
/// [`PolicyAllocator`](crate::PolicyAllocator) over it costs nothing to build
/// or clone.
///
/// ```
/// use polyalloc_core::{FixedPool, Locked, PolicyAllocator, SizeClassRouter, singleton_policy};
///
/// singleton_policy! {
///     /// Process-wide router.
///     pub SharedRouter => SizeClassRouter<Locked<FixedPool>>
/// }
///
/// let a = PolicyAllocator::<u32, SharedRouter>::default();
/// let b = PolicyAllocator::<u64, SharedRouter>::default();
/// assert!(a == b);
/// let p = a.allocate(3).unwrap();
/// unsafe { a.deallocate(p, 3) };
/// ```
#[macro_export]
macro_rules! singleton_policy {
    ($(#[$meta:meta])* $vis:vis $name:ident => $policy:ty) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
        $vis struct $name;

        impl $name {
            /// The backing static holder.
            pub fn singleton() -> &'static $crate::Singleton<$policy> {
                static INSTANCE: $crate::Singleton<$policy> = $crate::Singleton::new();
                &INSTANCE
            }

            /// The process-wide instance.
            pub fn instance() -> &'static $policy {
                Self::singleton().instance()
            }
        }

        impl $crate::AllocPolicy for $name {
            const ALIGN: usize = <$policy as $crate::AllocPolicy>::ALIGN;

            #[inline]
            fn alloc(&self, size: usize) -> ::core::option::Option<::core::ptr::NonNull<u8>> {
                <$policy as $crate::AllocPolicy>::alloc(Self::instance(), size)
            }

            #[inline]
            unsafe fn free(&self, ptr: ::core::ptr::NonNull<u8>, size: usize) {
                unsafe { <$policy as $crate::AllocPolicy>::free(Self::instance(), ptr, size) }
            }

            fn clear(&self) {
                <$policy as $crate::AllocPolicy>::clear(Self::instance())
            }
        }
    };
}
