//! Fixed-size block pool.
//!
//! Serves blocks of one size from chunks obtained from the global allocator.
//! Chunks are carved lazily; freed blocks go on an intrusive LIFO free list
//! whose link lives in the first word of each free block.
//!
//! A pool may receive blocks carved by another pool of the same block size
//! (that is how a block allocated on one thread is released on another), so
//! chunk memory is only returned to the system when every block ever carved
//! from this pool's chunks sits on this pool's own free list. Otherwise
//! `clear()` keeps the chunks and dropping the pool leaks them rather than
//! freeing memory that may still be in use.

use std::alloc::{self, Layout};
use std::cell::RefCell;
use std::ptr::NonNull;

use tracing::{debug, trace, warn};

use super::{AllocPolicy, MIN_ALIGN};
use crate::config::FixedPoolConfig;

/// Policies that serve exactly one block size and can be built for any size.
///
/// The size-class router builds one member per class through this trait.
pub trait FixedSize: AllocPolicy + Sized {
    /// Creates a policy serving requests of up to `block_size` bytes.
    fn with_block_size(block_size: usize) -> Self;

    /// Largest request this policy serves.
    fn block_size(&self) -> usize;
}

/// Free-list link stored in the first word of every free block.
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// Smallest block able to hold a free-list link.
const LINK_SIZE: usize = std::mem::size_of::<FreeBlock>();

struct Chunk {
    base: NonNull<u8>,
    layout: Layout,
}

impl Chunk {
    fn contains(&self, addr: usize) -> bool {
        let start = self.base.as_ptr() as usize;
        addr >= start && addr - start < self.layout.size()
    }
}

struct PoolState {
    /// Head of the free list.
    free: Option<NonNull<FreeBlock>>,
    /// Blocks on the free list, own or foreign.
    free_len: usize,
    /// Next uncarved block of the newest chunk.
    cursor: Option<NonNull<u8>>,
    /// Uncarved blocks left in the newest chunk.
    remaining: usize,
    /// Blocks carved from this pool's chunks so far.
    carved: usize,
    chunks: Vec<Chunk>,
}

impl PoolState {
    const fn new() -> Self {
        Self {
            free: None,
            free_len: 0,
            cursor: None,
            remaining: 0,
            carved: 0,
            chunks: Vec::new(),
        }
    }

    fn pop(&mut self) -> Option<NonNull<u8>> {
        let head = self.free?;
        // SAFETY: every node on the list was written by `push` and belongs to
        // the list until popped.
        self.free = unsafe { head.as_ref().next };
        self.free_len -= 1;
        Some(head.cast())
    }

    /// # Safety
    ///
    /// `ptr` must be a word-aligned block of at least `LINK_SIZE` bytes that
    /// nobody else uses.
    unsafe fn push(&mut self, ptr: NonNull<u8>) {
        let node = ptr.cast::<FreeBlock>();
        // SAFETY: guaranteed by the caller.
        unsafe { node.write(FreeBlock { next: self.free }) };
        self.free = Some(node);
        self.free_len += 1;
    }

    fn carve(&mut self, block_size: usize) -> Option<NonNull<u8>> {
        if self.remaining == 0 {
            return None;
        }
        let ptr = self.cursor?;
        self.remaining -= 1;
        self.carved += 1;
        self.cursor = if self.remaining > 0 {
            // SAFETY: at least one more whole block follows inside the chunk.
            Some(unsafe { ptr.add(block_size) })
        } else {
            None
        };
        Some(ptr)
    }

    fn refill(&mut self, block_size: usize, config: &FixedPoolConfig) -> Option<()> {
        let blocks = config.blocks_per_chunk(block_size);
        let bytes = blocks.checked_mul(block_size)?;
        let layout = Layout::from_size_align(bytes, MIN_ALIGN).ok()?;
        // SAFETY: `bytes >= block_size > 0`.
        let base = NonNull::new(unsafe { alloc::alloc(layout) })?;
        self.chunks.push(Chunk { base, layout });
        self.cursor = Some(base);
        self.remaining = blocks;
        trace!(block_size, blocks, chunks = self.chunks.len(), "fixed pool refill");
        Some(())
    }

    /// True when the free list is exactly the set of blocks carved here.
    ///
    /// Blocks are distinct (a double free breaks the `free` contract), so if
    /// every listed block lies in an own chunk and the counts agree, no own
    /// block can be live or parked on another pool's list.
    fn owns_every_block(&self) -> bool {
        if self.free_len != self.carved {
            return false;
        }
        let mut node = self.free;
        while let Some(block) = node {
            let addr = block.as_ptr() as usize;
            if !self.chunks.iter().any(|chunk| chunk.contains(addr)) {
                return false;
            }
            // SAFETY: list invariant, see `pop`.
            node = unsafe { block.as_ref().next };
        }
        true
    }

    fn release(&mut self) {
        for chunk in self.chunks.drain(..) {
            // SAFETY: allocated in `refill` with this layout; `owns_every_block`
            // proved no block inside is still referenced.
            unsafe { alloc::dealloc(chunk.base.as_ptr(), chunk.layout) };
        }
        *self = Self::new();
    }
}

/// Snapshot of a pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedPoolStats {
    pub block_size: usize,
    pub chunks: usize,
    pub carved: usize,
    pub free: usize,
}

impl FixedPoolStats {
    /// Own blocks not on this pool's free list (live, or freed elsewhere).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.carved.saturating_sub(self.free)
    }
}

/// Single-owner pool of fixed-size blocks.
///
/// `Send` but not `Sync`: wrap it in [`Locked`](crate::Locked) to share one
/// pool, or in [`ThreadCached`](crate::ThreadCached) to give each thread its
/// own.
pub struct FixedPool {
    block_size: usize,
    config: FixedPoolConfig,
    state: RefCell<PoolState>,
}

// SAFETY: the raw pointers in `PoolState` refer to chunks this pool owns and
// to free blocks handed over to it; nothing is tied to the creating thread.
// `RefCell` keeps the pool `!Sync`.
unsafe impl Send for FixedPool {}

impl FixedPool {
    /// Pool for `block_size`-byte blocks, chunk size from the environment.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self::with_config(block_size, FixedPoolConfig::from_env())
    }

    /// Pool with an explicit configuration.
    ///
    /// The block size is raised to hold a free-list link and rounded up to
    /// [`MIN_ALIGN`].
    #[must_use]
    pub fn with_config(block_size: usize, config: FixedPoolConfig) -> Self {
        let raised = block_size.max(LINK_SIZE);
        let block_size = raised.checked_next_multiple_of(MIN_ALIGN).unwrap_or(raised);
        Self {
            block_size,
            config,
            state: RefCell::new(PoolState::new()),
        }
    }

    /// Largest request served (the rounded block size).
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn stats(&self) -> FixedPoolStats {
        let state = self.state.borrow();
        FixedPoolStats {
            block_size: self.block_size,
            chunks: state.chunks.len(),
            carved: state.carved,
            free: state.free_len,
        }
    }
}

impl AllocPolicy for FixedPool {
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > self.block_size {
            return None;
        }
        let mut state = self.state.borrow_mut();
        if let Some(ptr) = state.pop() {
            return Some(ptr);
        }
        if state.remaining == 0 {
            state.refill(self.block_size, &self.config)?;
        }
        state.carve(self.block_size)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        debug_assert!(
            size <= self.block_size,
            "freeing {size} bytes into a {}-byte pool",
            self.block_size
        );
        // SAFETY: caller guarantees the block came from an interchangeable
        // pool, so it is at least `block_size` bytes and word-aligned.
        unsafe { self.state.borrow_mut().push(ptr) }
    }

    fn clear(&self) {
        let mut state = self.state.borrow_mut();
        if state.chunks.is_empty() {
            return;
        }
        if state.owns_every_block() {
            let chunks = state.chunks.len();
            state.release();
            debug!(block_size = self.block_size, chunks, "fixed pool released");
        } else {
            debug!(
                block_size = self.block_size,
                outstanding = state.carved.saturating_sub(state.free_len),
                "fixed pool keeps chunks with blocks in use"
            );
        }
    }
}

impl FixedSize for FixedPool {
    fn with_block_size(block_size: usize) -> Self {
        Self::new(block_size)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        let block_size = self.block_size;
        let state = self.state.get_mut();
        if state.chunks.is_empty() {
            return;
        }
        if state.owns_every_block() {
            state.release();
        } else {
            warn!(
                block_size,
                chunks = state.chunks.len(),
                outstanding = state.carved.saturating_sub(state.free_len),
                "fixed pool dropped with blocks in use; leaking its chunks"
            );
        }
    }
}

impl std::fmt::Debug for FixedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
