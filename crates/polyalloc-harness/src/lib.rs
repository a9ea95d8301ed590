//! Stress and inspection tooling for polyalloc.
//!
//! This crate provides:
//! - Stress: the multi-threaded end-to-end scenario over a thread-cached
//!   size-class router, with per-block integrity checks and leak accounting
//! - Classify: the size-class table rendered as data
//! - Structured logs: JSONL records for stress runs

pub mod classify;
pub mod error;
pub mod stress;
pub mod structured_log;

pub use classify::{ClassRow, classification_table};
pub use error::HarnessError;
pub use stress::{
    StressConfig, StressReport, check_report, measure_stress, parse_seed, run_stress,
};
