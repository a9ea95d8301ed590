//! Runtime pool configuration.
//!
//! The chunk size used by [`FixedPool`](crate::FixedPool) comes from the
//! `POLYALLOC_CHUNK_KIB` environment variable:
//! - unset or unparsable: 64 KiB
//! - otherwise the value in KiB, clamped to `[4, 16384]`
//!
//! The variable is read once per process and cached thereafter. Code that
//! needs a different size for one pool passes a [`FixedPoolConfig`]
//! explicitly instead.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Environment variable holding the chunk size in KiB.
pub const CHUNK_KIB_ENV: &str = "POLYALLOC_CHUNK_KIB";

/// Chunk size used when the environment does not say otherwise.
pub const DEFAULT_CHUNK_KIB: usize = 64;

/// Smallest accepted chunk size.
pub const MIN_CHUNK_KIB: usize = 4;

/// Largest accepted chunk size.
pub const MAX_CHUNK_KIB: usize = 16 * 1024;

// 0 = unresolved. Concurrent first calls may both resolve; they store the
// same value.
static CACHED_CHUNK_KIB: AtomicUsize = AtomicUsize::new(0);

fn parse_chunk_kib(raw: &str) -> usize {
    raw.trim()
        .parse::<usize>()
        .map(|kib| kib.clamp(MIN_CHUNK_KIB, MAX_CHUNK_KIB))
        .unwrap_or(DEFAULT_CHUNK_KIB)
}

/// Configured chunk size in KiB (reads the environment on first call).
#[must_use]
pub fn chunk_kib() -> usize {
    let cached = CACHED_CHUNK_KIB.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }

    let kib = std::env::var(CHUNK_KIB_ENV)
        .map(|raw| parse_chunk_kib(&raw))
        .unwrap_or(DEFAULT_CHUNK_KIB);
    CACHED_CHUNK_KIB.store(kib, Ordering::Relaxed);
    tracing::debug!(chunk_kib = kib, "resolved fixed pool chunk size");
    kib
}

/// Sizing knobs for a [`FixedPool`](crate::FixedPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoolConfig {
    /// Bytes requested from the global allocator per refill.
    pub chunk_bytes: usize,
}

impl FixedPoolConfig {
    /// Configuration resolved from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            chunk_bytes: chunk_kib() * 1024,
        }
    }

    /// Explicit chunk size in bytes.
    #[must_use]
    pub const fn with_chunk_bytes(chunk_bytes: usize) -> Self {
        Self { chunk_bytes }
    }

    /// Number of `block_size` blocks carved from one chunk (at least one).
    #[must_use]
    pub const fn blocks_per_chunk(&self, block_size: usize) -> usize {
        if block_size == 0 || self.chunk_bytes < block_size {
            1
        } else {
            self.chunk_bytes / block_size
        }
    }
}

impl Default for FixedPoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
