//! Multi-threaded end-to-end stress run.
//!
//! Every worker thread allocates `ops_per_thread` blocks of uniformly random
//! size from a shared `Tracked<ThreadCached<SizeClassRouter<Locked<FixedPool>>>>`,
//! fills each with pseudo-random bytes and records its blake3 hash. Frees are
//! interleaved with the allocations: after each allocation the worker draws a
//! target between zero and `max_live` and re-hashes and frees its oldest
//! blocks until no more than that many remain. Whatever is left at the end
//! is freed in allocation order. After the workers exit the tracked counters
//! must show zero live blocks.
//!
//! The workload is fully determined by the config: the same seed yields the
//! same `workload_digest`.

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use polyalloc_core::{
    AllocPolicy, FixedPool, Locked, SizeClassRouter, ThreadCacheStats, ThreadCached, Tracked,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::HarnessError;

/// Policy stack the stress run exercises.
pub type StressStack = Tracked<ThreadCached<SizeClassRouter<Locked<FixedPool>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressConfig {
    pub threads: usize,
    pub ops_per_thread: usize,
    pub min_size: usize,
    pub max_size: usize,
    /// Most blocks a worker keeps live at once.
    pub max_live: usize,
    pub seed: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 10_000,
            min_size: 1,
            max_size: 1024,
            max_live: 256,
            seed: 0xDEAD_BEEF,
        }
    }
}

impl StressConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.threads == 0 {
            return Err(HarnessError::InvalidConfig("threads must be at least 1".into()));
        }
        if self.ops_per_thread == 0 {
            return Err(HarnessError::InvalidConfig(
                "ops_per_thread must be at least 1".into(),
            ));
        }
        if self.min_size == 0 {
            return Err(HarnessError::InvalidConfig("min_size must be at least 1".into()));
        }
        if self.max_live == 0 {
            return Err(HarnessError::InvalidConfig("max_live must be at least 1".into()));
        }
        if self.min_size > self.max_size {
            return Err(HarnessError::InvalidConfig(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadReport {
    pub thread: usize,
    pub allocs: usize,
    pub bytes: usize,
    pub corrupted: usize,
    /// blake3 over every block's size and content hash, in allocation order.
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub created: u64,
    pub reused: u64,
    pub returned: u64,
    pub idle_before_clear: usize,
    pub idle_after_clear: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressReport {
    pub config: StressConfig,
    pub total_allocs: usize,
    pub total_bytes: usize,
    pub peak_live_bytes: usize,
    pub corrupted_blocks: usize,
    pub leaked_blocks: usize,
    pub leaked_bytes: usize,
    pub instances: InstanceReport,
    pub threads: Vec<ThreadReport>,
    pub workload_digest: String,
    pub elapsed_ms: u64,
}

impl StressReport {
    /// No corruption and no leaks.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corrupted_blocks == 0 && self.leaked_blocks == 0 && self.leaked_bytes == 0
    }
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // Zero is a fixed point of the xorshift step.
        Self {
            state: if seed == 0 { 0x2545_F491_4F6C_DD1D } else { seed },
        }
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
        let span = (high_inclusive - low) as u64 + 1;
        low + (self.next_u64() % span) as usize
    }
}

fn thread_seed(seed: u64, thread: usize) -> u64 {
    seed ^ (thread as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// A live block whose bytes are always initialized.
struct LiveBlock {
    ptr: NonNull<u8>,
    size: usize,
    hash: blake3::Hash,
}

#[allow(unsafe_code)]
impl LiveBlock {
    fn filled(policy: &StressStack, size: usize, rng: &mut XorShift64) -> Option<Self> {
        let ptr = policy.alloc(size)?;
        for off in 0..size {
            // SAFETY: `ptr` is a fresh block of at least `size` bytes.
            unsafe { ptr.as_ptr().add(off).write(rng.next_u64() as u8) };
        }
        // SAFETY: all `size` bytes were written above.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
        let hash = blake3::hash(bytes);
        Some(Self { ptr, size, hash })
    }

    fn is_intact(&self) -> bool {
        // SAFETY: initialized in `filled`, live until `release`.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) };
        blake3::hash(bytes) == self.hash
    }

    fn release(self, policy: &StressStack) {
        // SAFETY: allocated from `policy` with `size` in `filled`, freed once.
        unsafe { policy.free(self.ptr, self.size) };
    }
}

fn run_worker(
    policy: &StressStack,
    cfg: &StressConfig,
    thread: usize,
) -> Result<ThreadReport, HarnessError> {
    let mut rng = XorShift64::new(thread_seed(cfg.seed, thread));
    let mut live: VecDeque<LiveBlock> = VecDeque::with_capacity(cfg.max_live + 1);
    let mut digest = blake3::Hasher::new();
    let mut bytes = 0;
    let mut corrupted = 0;
    let mut retire = |block: LiveBlock| {
        if !block.is_intact() {
            corrupted += 1;
        }
        block.release(policy);
    };

    for _ in 0..cfg.ops_per_thread {
        let size = rng.gen_range(cfg.min_size, cfg.max_size);
        let Some(block) = LiveBlock::filled(policy, size, &mut rng) else {
            live.into_iter().for_each(|block| block.release(policy));
            return Err(HarnessError::Exhausted { thread, size });
        };
        digest.update(&(size as u64).to_le_bytes());
        digest.update(block.hash.as_bytes());
        bytes += size;
        live.push_back(block);

        let keep = rng.gen_range(0, cfg.max_live);
        while live.len() > keep {
            if let Some(oldest) = live.pop_front() {
                retire(oldest);
            }
        }
    }
    live.into_iter().for_each(&mut retire);
    if corrupted > 0 {
        warn!(thread, corrupted, "blocks failed their checksum");
    }
    debug!(thread, allocs = cfg.ops_per_thread, bytes, "stress worker done");

    Ok(ThreadReport {
        thread,
        allocs: cfg.ops_per_thread,
        bytes,
        corrupted,
        digest: digest.finalize().to_hex().to_string(),
    })
}

/// Runs the scenario and reports what happened, without judging the result.
pub fn measure_stress(cfg: &StressConfig) -> Result<StressReport, HarnessError> {
    cfg.validate()?;
    info!(
        threads = cfg.threads,
        ops_per_thread = cfg.ops_per_thread,
        seed = cfg.seed,
        "stress run start"
    );
    let started = Instant::now();
    let policy: Arc<StressStack> = Arc::new(Tracked::new(ThreadCached::new()));

    let handles: Vec<_> = (0..cfg.threads)
        .map(|thread| {
            let policy = Arc::clone(&policy);
            let cfg = *cfg;
            thread::spawn(move || run_worker(&policy, &cfg, thread))
        })
        .collect();
    // Join everything before looking at results so no worker outlives the run.
    let joined: Vec<_> = handles.into_iter().map(thread::JoinHandle::join).collect();

    let mut threads = Vec::with_capacity(cfg.threads);
    for (thread, result) in joined.into_iter().enumerate() {
        let report = result.map_err(|_| HarnessError::WorkerPanicked { thread })??;
        threads.push(report);
    }

    let tracked = policy.stats();
    let cache: ThreadCacheStats = policy.inner().stats();
    policy.clear();
    let idle_after_clear = policy.inner().idle_len();

    let mut workload = blake3::Hasher::new();
    for report in &threads {
        workload.update(report.digest.as_bytes());
    }

    let report = StressReport {
        config: *cfg,
        total_allocs: threads.iter().map(|t| t.allocs).sum(),
        total_bytes: threads.iter().map(|t| t.bytes).sum(),
        peak_live_bytes: tracked.peak_bytes,
        corrupted_blocks: threads.iter().map(|t| t.corrupted).sum(),
        leaked_blocks: tracked.live_blocks,
        leaked_bytes: tracked.live_bytes,
        instances: InstanceReport {
            created: cache.created,
            reused: cache.reused,
            returned: cache.returned,
            idle_before_clear: cache.idle,
            idle_after_clear,
        },
        threads,
        workload_digest: workload.finalize().to_hex().to_string(),
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
    };
    info!(
        total_allocs = report.total_allocs,
        elapsed_ms = report.elapsed_ms,
        clean = report.is_clean(),
        "stress run done"
    );
    Ok(report)
}

/// Turns corruption or leaks in a report into an error.
pub fn check_report(report: &StressReport) -> Result<(), HarnessError> {
    if report.corrupted_blocks > 0 {
        return Err(HarnessError::Corruption {
            blocks: report.corrupted_blocks,
        });
    }
    if report.leaked_blocks > 0 || report.leaked_bytes > 0 {
        return Err(HarnessError::Leak {
            blocks: report.leaked_blocks,
            bytes: report.leaked_bytes,
        });
    }
    Ok(())
}

/// Runs the scenario and fails on corruption or leaks.
pub fn run_stress(cfg: &StressConfig) -> Result<StressReport, HarnessError> {
    let report = measure_stress(cfg)?;
    check_report(&report)?;
    Ok(report)
}

/// Parses a seed given in decimal or `0x` hex, `_` separators allowed.
pub fn parse_seed(raw: &str) -> Result<u64, HarnessError> {
    let s = raw.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(&hex.replace('_', ""), 16)
    } else {
        s.replace('_', "").parse::<u64>()
    };
    parsed.map_err(|e| HarnessError::InvalidConfig(format!("seed '{raw}': {e}")))
}
