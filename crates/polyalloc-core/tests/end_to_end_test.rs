use polyalloc_core::{AllocPolicy, FixedPool, Locked, SizeClassRouter, ThreadCached, Tracked};
use serde_json::json;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 4;
const OPS_PER_THREAD: usize = 10_000;
const MIN_SIZE: usize = 1;
const MAX_SIZE: usize = 1024;
const MAX_LIVE: usize = 256;

type Stack = Tracked<ThreadCached<SizeClassRouter<Locked<FixedPool>>>>;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

struct LiveBlock {
    ptr: NonNull<u8>,
    size: usize,
    seed: u64,
    checksum: u64,
}

fn fill(ptr: NonNull<u8>, size: usize, seed: u64) {
    let mut rng = XorShift64::new(seed | 1);
    for off in 0..size {
        // SAFETY: block of `size` bytes owned by the caller.
        unsafe { ptr.as_ptr().add(off).write(rng.next_u64() as u8) };
    }
}

fn checksum(ptr: NonNull<u8>, size: usize) -> u64 {
    let mut sum = 0xcbf2_9ce4_8422_2325_u64;
    for off in 0..size {
        // SAFETY: block of `size` bytes owned by the caller.
        let byte = unsafe { *ptr.as_ptr().add(off) };
        sum = (sum ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3);
    }
    sum
}

#[derive(Debug, Default)]
struct ThreadOutcome {
    allocated: usize,
    bytes: usize,
    corrupted: usize,
    peak_live: usize,
}

/// Verifies, rewrites and frees one block.
fn retire(policy: &Stack, block: LiveBlock, outcome: &mut ThreadOutcome) {
    if checksum(block.ptr, block.size) != block.checksum {
        outcome.corrupted += 1;
    }
    // Refill to confirm the block is still writable end to end.
    fill(block.ptr, block.size, block.seed.rotate_left(7));
    // SAFETY: allocated by `run_worker` with this size, freed once.
    unsafe { policy.free(block.ptr, block.size) };
}

fn run_worker(policy: &Stack, seed: u64) -> ThreadOutcome {
    let mut rng = XorShift64::new(seed);
    let mut live = VecDeque::with_capacity(MAX_LIVE + 1);
    let mut outcome = ThreadOutcome::default();

    for _ in 0..OPS_PER_THREAD {
        let size = rng.gen_range(MIN_SIZE, MAX_SIZE);
        let ptr = policy.alloc(size).expect("router serves every size");
        let block_seed = rng.next_u64();
        fill(ptr, size, block_seed);
        live.push_back(LiveBlock {
            ptr,
            size,
            seed: block_seed,
            checksum: checksum(ptr, size),
        });
        outcome.allocated += 1;
        outcome.bytes += size;
        outcome.peak_live = outcome.peak_live.max(live.len());

        // Free the oldest blocks down to a random target, in allocation order.
        let keep = rng.gen_range(0, MAX_LIVE);
        while live.len() > keep {
            let Some(oldest) = live.pop_front() else { break };
            retire(policy, oldest, &mut outcome);
        }
    }

    for block in live {
        retire(policy, block, &mut outcome);
    }
    outcome
}

#[test]
fn four_threads_ten_thousand_random_sizes() {
    let policy = Arc::new(Stack::new(ThreadCached::new()));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let policy = Arc::clone(&policy);
            thread::spawn(move || run_worker(&policy, 0x9E37_79B9_7F4A_7C15 ^ (t as u64 + 1)))
        })
        .collect();
    let outcomes: Vec<ThreadOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let stats = policy.stats();
    let cache = policy.inner().stats();
    let report = json!({
        "threads": THREADS,
        "allocated": outcomes.iter().map(|o| o.allocated).sum::<usize>(),
        "bytes": outcomes.iter().map(|o| o.bytes).sum::<usize>(),
        "corrupted": outcomes.iter().map(|o| o.corrupted).sum::<usize>(),
        "live_blocks": stats.live_blocks,
        "peak_bytes": stats.peak_bytes,
        "instances_created": cache.created,
        "instances_idle": cache.idle,
    });

    assert_eq!(report["allocated"], THREADS * OPS_PER_THREAD, "{report}");
    assert_eq!(report["corrupted"], 0, "{report}");
    for outcome in &outcomes {
        assert!(outcome.peak_live >= 1 && outcome.peak_live <= MAX_LIVE + 1);
    }
    assert!(stats.is_balanced(), "leaked blocks: {report}");
    assert!(stats.peak_bytes <= THREADS * (MAX_LIVE + 1) * MAX_SIZE, "{report}");
    assert_eq!(stats.failed_allocs, 0);
    assert!(cache.created as usize <= THREADS);
    assert_eq!(cache.idle as u64, cache.created);

    policy.clear();
    assert_eq!(policy.inner().stats().idle, 0);
}

#[test]
fn stack_keeps_working_after_clear() {
    let policy = Arc::new(Stack::new(ThreadCached::new()));
    for round in 0..3u64 {
        let worker = Arc::clone(&policy);
        let outcome = thread::spawn(move || {
            let mut rng = XorShift64::new(round + 17);
            let mut blocks = Vec::new();
            for _ in 0..500 {
                let size = rng.gen_range(MIN_SIZE, MAX_SIZE);
                blocks.push((worker.alloc(size).unwrap(), size));
            }
            for (ptr, size) in blocks {
                // SAFETY: allocated above with this size.
                unsafe { worker.free(ptr, size) };
            }
        })
        .join();
        assert!(outcome.is_ok());
        policy.clear();
        assert_eq!(policy.inner().stats().idle, 0);
    }
    let cache = policy.inner().stats();
    assert_eq!(cache.created, 3);
    assert_eq!(cache.discarded, 3);
    assert!(policy.stats().is_balanced());
}
