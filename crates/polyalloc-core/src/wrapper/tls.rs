//! Per-thread binding registry for [`ThreadCached`](super::thread_cache::ThreadCached).
//!
//! `thread_local!` statics cannot be generic or per-instance, so every
//! wrapper gets a process-unique owner id and its binding lives in one
//! type-erased map per thread. The map's destructor drops each binding once
//! at thread exit. Bindings whose wrapper is gone are purged whenever a new
//! binding is added.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;

/// A binding that can tell when the wrapper it belongs to is gone.
pub(crate) trait Detach: Any {
    fn is_detached(&self) -> bool;
}

struct Entry {
    value: Rc<dyn Any>,
    detached: fn(&dyn Any) -> bool,
}

fn detached<T: Detach>(value: &dyn Any) -> bool {
    value.downcast_ref::<T>().is_none_or(T::is_detached)
}

thread_local! {
    static BINDINGS: RefCell<HashMap<u64, Entry, RandomState>> =
        RefCell::new(HashMap::with_hasher(RandomState::new()));
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_owner_id() -> u64 {
    NEXT_OWNER.fetch_add(1, Ordering::Relaxed)
}

/// This thread's binding for `owner`, created with `bind` on first use.
///
/// `None` when thread-local storage is unavailable (the thread is exiting)
/// or the map is already borrowed further up the stack. `bind` runs with no
/// borrow held.
pub(crate) fn binding<T: Detach>(owner: u64, bind: impl FnOnce() -> T) -> Option<Rc<T>> {
    let existing = BINDINGS
        .try_with(|map| {
            map.try_borrow()
                .ok()
                .map(|map| map.get(&owner).map(|entry| Rc::clone(&entry.value)))
        })
        .ok()??;
    let erased = match existing {
        Some(erased) => erased,
        None => insert(owner, Rc::new(bind()), detached::<T>)?,
    };
    erased.downcast::<T>().ok()
}

fn insert(owner: u64, value: Rc<dyn Any>, detached: fn(&dyn Any) -> bool) -> Option<Rc<dyn Any>> {
    // On failure `value` drops inside the closure and the binding unwinds
    // normally.
    let (bound, stale) = BINDINGS
        .try_with(|map| {
            let mut map = map.try_borrow_mut().ok()?;
            let dead: Vec<u64> = map
                .iter()
                .filter(|(_, entry)| (entry.detached)(&*entry.value))
                .map(|(owner, _)| *owner)
                .collect();
            let stale: Vec<Entry> = dead.iter().filter_map(|owner| map.remove(owner)).collect();
            let bound = Rc::clone(&map.entry(owner).or_insert(Entry { value, detached }).value);
            Some((bound, stale))
        })
        .ok()??;
    // Dropped with no borrow held.
    drop(stale);
    Some(bound)
}

/// Drops this thread's binding for `owner`, if any.
pub(crate) fn unbind(owner: u64) {
    let removed = BINDINGS
        .try_with(|map| map.try_borrow_mut().ok()?.remove(&owner))
        .ok()
        .flatten();
    drop(removed);
}

#[cfg(test)]
fn live_bindings() -> usize {
    BINDINGS.with(|map| map.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Plain(u32);

    impl Detach for Plain {
        fn is_detached(&self) -> bool {
            false
        }
    }

    struct Flagged(Rc<Cell<bool>>);

    impl Detach for Flagged {
        fn is_detached(&self) -> bool {
            self.0.get()
        }
    }

    #[test]
    fn test_binding_is_created_once() {
        let owner = next_owner_id();
        let calls = Cell::new(0);
        let first = binding(owner, || {
            calls.set(calls.get() + 1);
            Plain(7)
        })
        .unwrap();
        let second = binding(owner, || {
            calls.set(calls.get() + 1);
            Plain(9)
        })
        .unwrap();
        assert_eq!((first.0, second.0), (7, 7));
        assert_eq!(calls.get(), 1);
        unbind(owner);
    }

    #[test]
    fn test_unbind_drops_binding() {
        thread_local! {
            static DROPPED: Cell<bool> = const { Cell::new(false) };
        }
        struct Marker;
        impl Detach for Marker {
            fn is_detached(&self) -> bool {
                false
            }
        }
        impl Drop for Marker {
            fn drop(&mut self) {
                DROPPED.with(|d| d.set(true));
            }
        }

        let owner = next_owner_id();
        drop(binding(owner, || Marker));
        assert!(!DROPPED.with(Cell::get));
        unbind(owner);
        assert!(DROPPED.with(Cell::get));
    }

    #[test]
    fn test_type_mismatch_is_none() {
        let owner = next_owner_id();
        assert!(binding(owner, || Plain(1)).is_some());
        assert!(binding(owner, || Flagged(Rc::default())).is_none());
        unbind(owner);
    }

    #[test]
    fn test_detached_bindings_are_purged_on_insert() {
        std::thread::spawn(|| {
            let gone = Rc::new(Cell::new(false));
            let owners: Vec<u64> = (0..10).map(|_| next_owner_id()).collect();
            for &owner in &owners {
                binding(owner, || Flagged(Rc::clone(&gone))).unwrap();
            }
            assert_eq!(live_bindings(), 10);

            gone.set(true);
            let fresh = next_owner_id();
            binding(fresh, || Plain(0)).unwrap();
            assert_eq!(live_bindings(), 1);
            // Only the shared flag's own handle is left.
            assert_eq!(Rc::strong_count(&gone), 1);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_owner_ids_are_unique() {
        let a = next_owner_id();
        let b = next_owner_id();
        assert_ne!(a, b);
    }
}
