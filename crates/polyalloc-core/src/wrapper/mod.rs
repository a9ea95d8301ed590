//! Wrappers layering behaviour over a policy.
//!
//! - [`adapter`]: typed allocator for generic containers
//! - [`thread_cache`]: one exclusively owned instance per thread
//! - [`singleton`]: one process-wide instance
//! - [`router`] + [`size_class`]: size-class dispatch to fixed pools

pub mod adapter;
pub mod router;
pub mod singleton;
pub mod size_class;
pub mod thread_cache;

mod tls;
