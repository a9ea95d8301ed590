use polyalloc_core::{
    AllocPolicy, FixedPool, Locked, PoolFamily, SizeClassMap, SizeClassRouter, ThreadCached,
};
use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

/// Forwards to `System` and keeps a running total of live heap bytes.
struct Counting;

static LIVE_BYTES: AtomicIsize = AtomicIsize::new(0);

// SAFETY: every call is forwarded unchanged to `System`.
unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded caller contract.
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            LIVE_BYTES.fetch_add(layout.size() as isize, Ordering::SeqCst);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: forwarded caller contract.
        unsafe { System.dealloc(ptr, layout) };
        LIVE_BYTES.fetch_sub(layout.size() as isize, Ordering::SeqCst);
    }
}

#[global_allocator]
static GLOBAL: Counting = Counting;

type Cached = ThreadCached<SizeClassRouter<Locked<FixedPool>>>;

const BLOCKS: usize = 2_000;
const SIZE: usize = 64;

struct SendPtr(NonNull<u8>);

// SAFETY: ownership of the block moves with the message.
unsafe impl Send for SendPtr {}

fn live_bytes() -> isize {
    LIVE_BYTES.load(Ordering::SeqCst)
}

/// One alloc/free cycle on a throwaway thread and wrapper, so the shared
/// family and the logging callsites exist before measuring.
fn warm_up() {
    let cached = Arc::new(Cached::new());
    let worker = Arc::clone(&cached);
    thread::spawn(move || {
        let ptr = worker.alloc(SIZE).unwrap();
        // SAFETY: allocated above with this size.
        unsafe { worker.free(ptr, SIZE) };
    })
    .join()
    .unwrap();
    drop(cached);
}

#[test]
fn blocks_freed_on_another_live_thread_release_every_chunk() {
    warm_up();

    let cached = Arc::new(Cached::new());
    let (tx, rx) = mpsc::channel::<SendPtr>();
    // Waited twice: once when the threads are up, once to let them start.
    let start = Arc::new(Barrier::new(3));
    let done = Arc::new(Barrier::new(3));
    let exit = Arc::new(Barrier::new(3));

    let producer = {
        let cached = Arc::clone(&cached);
        let (start, done, exit) = (Arc::clone(&start), Arc::clone(&done), Arc::clone(&exit));
        thread::spawn(move || {
            start.wait();
            start.wait();
            for _ in 0..BLOCKS {
                let ptr = cached.alloc(SIZE).unwrap();
                // SAFETY: fresh block of `SIZE` bytes.
                unsafe { ptr.as_ptr().write_bytes(0x5A, SIZE) };
                tx.send(SendPtr(ptr)).unwrap();
            }
            drop(tx);
            drop(cached);
            done.wait();
            // Stay alive, binding and all, until the main thread has looked.
            exit.wait();
        })
    };
    let consumer = {
        let cached = Arc::clone(&cached);
        let (start, done, exit) = (Arc::clone(&start), Arc::clone(&done), Arc::clone(&exit));
        thread::spawn(move || {
            start.wait();
            start.wait();
            for SendPtr(ptr) in rx.iter() {
                // SAFETY: the block is `SIZE` bytes and only this thread holds it.
                assert_eq!(unsafe { *ptr.as_ptr().add(SIZE - 1) }, 0x5A);
                // SAFETY: allocated by the producer from the same wrapper with `SIZE`.
                unsafe { cached.free(ptr, SIZE) };
            }
            drop(cached);
            done.wait();
            exit.wait();
        })
    };

    start.wait();
    let baseline = live_bytes();
    start.wait();
    done.wait();

    // Both threads are alive and still bound to their instances.
    assert_eq!(cached.stats().bound, 2);
    cached.clear();
    drop(cached);
    let leaked = live_bytes() - baseline;

    let family = PoolFamily::<Locked<FixedPool>>::shared(SizeClassMap::DEFAULT);
    let chunks: usize = family.iter().map(|(_, pool)| pool.lock().stats().chunks).sum();

    exit.wait();
    producer.join().unwrap();
    consumer.join().unwrap();

    assert_eq!(chunks, 0, "shared pools kept chunks after every block came back");
    assert!(leaked < 4096, "{leaked} heap bytes still held after teardown");
}
