//! Per-thread policy instances.
//!
//! A [`ThreadCached`] owns every policy instance it ever builds. Each one is
//! either idle or bound to exactly one thread. The first call from a thread
//! pops the most recently idled instance (or builds a fresh one) and binds it
//! to that thread; later calls from the thread reach it through a
//! thread-local binding without locking. When the thread exits the instance
//! goes back on the idle list for the next thread to adopt.
//!
//! Since the wrapper keeps ownership, dropping it tears down every instance,
//! including those still bound to live threads. Their thread-local bindings
//! become detached and are purged the next time those threads bind another
//! wrapper, or at their exit.
//!
//! The wrapped policy needs to be `Send` but never `Sync`. Blocks freed on a
//! different thread than the one that allocated them land in that thread's
//! instance, so instances must be interchangeable: for a
//! [`SizeClassRouter`](crate::SizeClassRouter) that means routers over one
//! shared pool family, which is what its `Default` builds.
//!
//! ```text
//!   thread A ──┐ bind (pop)          ┌── idle (LIFO)   bound (by binding)
//!              ├──────────────────── │  [P2, P1]       {7: P3, 9: P4}
//!   thread B ──┘ exit (push)         └── clear() clears and drops idle
//! ```

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::tls;
use crate::policy::AllocPolicy;

/// Lifetime counters of a [`ThreadCached`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCacheStats {
    /// Instances default-constructed because the idle list was empty.
    pub created: u64,
    /// Bindings served from the idle list.
    pub reused: u64,
    /// Instances handed back by exiting threads.
    pub returned: u64,
    /// Idle instances cleared and dropped by `clear`.
    pub discarded: u64,
    /// Instances idle right now.
    pub idle: usize,
    /// Instances bound to a thread right now.
    pub bound: usize,
}

/// Heap instance owned by the wrapper; threads only ever see its address.
struct Owned<P>(NonNull<P>);

impl<P> Owned<P> {
    fn new(policy: P) -> Self {
        Self(NonNull::from(Box::leak(Box::new(policy))))
    }
}

impl<P> std::ops::Deref for Owned<P> {
    type Target = P;

    fn deref(&self) -> &P {
        // SAFETY: points at the box leaked in `new`, freed only in `drop`.
        unsafe { self.0.as_ref() }
    }
}

impl<P> Drop for Owned<P> {
    fn drop(&mut self) {
        // SAFETY: leaked in `new`, reclaimed exactly once here.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

// SAFETY: `Owned` is a uniquely owning box; moving it moves the `P`.
unsafe impl<P: Send> Send for Owned<P> {}

struct Slots<P: AllocPolicy> {
    idle: Mutex<Vec<Owned<P>>>,
    bound: Mutex<HashMap<u64, Owned<P>>>,
    next_key: AtomicU64,
    created: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
}

impl<P: AllocPolicy> Slots<P> {
    fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            bound: Mutex::new(HashMap::new()),
            next_key: AtomicU64::new(0),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    fn give_back(&self, policy: Owned<P>) {
        let idle = {
            let mut idle = self.idle.lock();
            idle.push(policy);
            idle.len()
        };
        self.returned.fetch_add(1, Ordering::Relaxed);
        debug!(idle, "thread cache instance returned");
    }

    /// Moves a bound instance back to the idle list.
    fn unbind(&self, key: u64) {
        let released = self.bound.lock().remove(&key);
        if let Some(policy) = released {
            self.give_back(policy);
        }
    }

    fn clear(&self) {
        let drained = std::mem::take(&mut *self.idle.lock());
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        // Cleared and dropped outside the lock.
        for policy in drained {
            policy.clear();
        }
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
        debug!(count, "thread cache cleared idle instances");
    }
}

impl<P: AllocPolicy + Default> Slots<P> {
    fn adopt(&self) -> Owned<P> {
        let popped = self.idle.lock().pop();
        match popped {
            Some(policy) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                debug!("thread cache reused idle instance");
                policy
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                debug!("thread cache created instance");
                Owned::new(P::default())
            }
        }
    }

    fn bind(self: &Arc<Self>) -> Binding<P> {
        let policy = self.adopt();
        let ptr = policy.0;
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.bound.lock().insert(key, policy);
        Binding {
            key,
            policy: ptr,
            home: Arc::downgrade(self),
        }
    }
}

impl<P: AllocPolicy> Drop for Slots<P> {
    fn drop(&mut self) {
        let idle = std::mem::take(self.idle.get_mut());
        let bound = std::mem::take(self.bound.get_mut());
        let count = idle.len() + bound.len();
        for policy in idle.into_iter().chain(bound.into_values()) {
            policy.clear();
        }
        if count > 0 {
            debug!(count, "thread cache dropped its instances");
        }
    }
}

/// A thread's claim on one instance, kept in the thread-local registry.
struct Binding<P: AllocPolicy> {
    key: u64,
    policy: NonNull<P>,
    home: Weak<Slots<P>>,
}

impl<P: AllocPolicy> Drop for Binding<P> {
    fn drop(&mut self) {
        // A dead home already dropped the instance.
        if let Some(slots) = self.home.upgrade() {
            slots.unbind(self.key);
        }
    }
}

impl<P: AllocPolicy + 'static> tls::Detach for Binding<P> {
    fn is_detached(&self) -> bool {
        self.home.strong_count() == 0
    }
}

/// Gives each thread its own exclusively owned `P`.
pub struct ThreadCached<P: AllocPolicy> {
    owner: u64,
    slots: Arc<Slots<P>>,
}

impl<P: AllocPolicy> ThreadCached<P> {
    pub fn new() -> Self {
        Self {
            owner: tls::next_owner_id(),
            slots: Arc::new(Slots::new()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> ThreadCacheStats {
        ThreadCacheStats {
            created: self.slots.created.load(Ordering::Relaxed),
            reused: self.slots.reused.load(Ordering::Relaxed),
            returned: self.slots.returned.load(Ordering::Relaxed),
            discarded: self.slots.discarded.load(Ordering::Relaxed),
            idle: self.idle_len(),
            bound: self.slots.bound.lock().len(),
        }
    }

    /// Instances currently on the idle list.
    pub fn idle_len(&self) -> usize {
        self.slots.idle.lock().len()
    }
}

impl<P: AllocPolicy + Default + 'static> ThreadCached<P> {
    /// Runs `f` against the calling thread's instance, binding one first if
    /// needed.
    ///
    /// While the thread is being torn down its binding may already be gone;
    /// `f` then runs against an instance borrowed from the idle list for this
    /// call only.
    pub fn with_bound<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        match tls::binding(self.owner, || self.slots.bind()) {
            // SAFETY: the instance stays in `bound` until this binding drops
            // or `slots` does, and `self` keeps `slots` alive for the call.
            Some(binding) => f(unsafe { binding.policy.as_ref() }),
            None => {
                let policy = self.slots.adopt();
                let result = f(&*policy);
                self.slots.give_back(policy);
                result
            }
        }
    }
}

impl<P: AllocPolicy> Default for ThreadCached<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: AllocPolicy + Default + 'static> AllocPolicy for ThreadCached<P> {
    const ALIGN: usize = P::ALIGN;

    #[inline]
    fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        self.with_bound(|policy| policy.alloc(size))
    }

    #[inline]
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract; instances are interchangeable.
        self.with_bound(|policy| unsafe { policy.free(ptr, size) })
    }

    /// Clears and drops every idle instance. Instances bound to live
    /// threads, including the caller's, are untouched.
    fn clear(&self) {
        self.slots.clear();
    }
}

impl<P: AllocPolicy> Drop for ThreadCached<P> {
    fn drop(&mut self) {
        tls::unbind(self.owner);
    }
}

impl<P: AllocPolicy> std::fmt::Debug for ThreadCached<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCached")
            .field("owner", &self.owner)
            .field("stats", &self.stats())
            .finish()
    }
}
