//! # polyalloc-core
//!
//! Composable allocation policies and the wrappers that layer behaviour on
//! top of them.
//!
//! A *policy* is anything implementing [`AllocPolicy`]: raw `alloc(size)`,
//! `free(ptr, size)` and `clear()`. Wrappers are policies themselves, so they
//! stack:
//!
//! - [`PolicyAllocator`] presents a policy as a typed, rebindable allocator for
//!   generic containers.
//! - [`ThreadCached`] gives every thread its own policy instance, recycled
//!   through a shared idle pool, so steady-state calls never lock.
//! - [`Singleton`] (and [`singleton_policy!`]) exposes one lazily initialized,
//!   process-wide instance.
//! - [`SizeClassRouter`] sends each request to one member of a family of
//!   fixed-size pools, chosen by a [`SizeClassMap`], or to a fallback. Routers
//!   of one configuration share a process-wide [`PoolFamily`].
//!
//! Reference policies ship alongside: [`SystemPolicy`] (global allocator
//! fallback), [`FixedPool`] (fixed-size free-list pool), [`Locked`] (mutex
//! around any policy) and [`Tracked`] (usage counters).
//!
//! ```
//! use polyalloc_core::{AllocPolicy, FixedPool, Locked, PolicyAllocator, SizeClassRouter, ThreadCached};
//!
//! let cached: ThreadCached<SizeClassRouter<Locked<FixedPool>>> = ThreadCached::new();
//! let alloc = PolicyAllocator::<u64, _>::new(&cached);
//! let block = alloc.allocate(4).unwrap();
//! unsafe { alloc.deallocate(block, 4) };
//! cached.clear();
//! ```

pub mod config;
pub mod error;
pub mod policy;
pub mod wrapper;

pub use config::FixedPoolConfig;
pub use error::{AllocError, AllocResult, MappingError};
pub use policy::fixed::{FixedPool, FixedPoolStats, FixedSize};
pub use policy::locked::Locked;
pub use policy::system::SystemPolicy;
pub use policy::tracked::{Tracked, TrackedStats};
pub use policy::{AllocPolicy, MIN_ALIGN};
pub use wrapper::adapter::PolicyAllocator;
pub use wrapper::router::{LocalRouter, PoolFamily, SizeClassRouter};
pub use wrapper::singleton::Singleton;
pub use wrapper::size_class::{CLASSES, DEFAULT_BASE_SIZE, DEFAULT_TABLE, FALLBACK, SizeClassMap};
pub use wrapper::thread_cache::{ThreadCacheStats, ThreadCached};
