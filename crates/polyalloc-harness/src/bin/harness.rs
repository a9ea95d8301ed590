//! CLI entrypoint for the polyalloc harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use polyalloc_core::{DEFAULT_BASE_SIZE, SizeClassMap};
use polyalloc_harness::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use polyalloc_harness::{
    StressConfig, check_report, classification_table, measure_stress, parse_seed,
};
use tracing_subscriber::EnvFilter;

/// Stress and inspection tooling for polyalloc.
#[derive(Debug, Parser)]
#[command(name = "polyalloc-harness")]
#[command(about = "Stress and classification harness for polyalloc")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the multi-threaded allocate/verify/free scenario.
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        /// Allocations per thread.
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        #[arg(long, default_value_t = 1)]
        min_size: usize,
        #[arg(long, default_value_t = 1024)]
        max_size: usize,
        /// Most blocks a worker keeps live before freeing its oldest.
        #[arg(long, default_value_t = 256)]
        max_live: usize,
        /// Root seed (decimal or 0x...).
        #[arg(long, default_value = "0xDEAD_BEEF")]
        seed: String,
        /// Output JSON report path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Print the size-class table.
    Classify {
        /// Granularity in bytes.
        #[arg(long, default_value_t = DEFAULT_BASE_SIZE)]
        base_size: usize,
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn write_json(output: Option<PathBuf>, json: &str) -> std::io::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, format!("{json}\n"))?;
            eprintln!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Stress {
            threads,
            ops,
            min_size,
            max_size,
            max_live,
            seed,
            output,
            log,
        } => {
            let cfg = StressConfig {
                threads,
                ops_per_thread: ops,
                min_size,
                max_size,
                max_live,
                seed: parse_seed(&seed)?,
            };
            let run_id = format!("seed-{:x}", cfg.seed);
            let mut emitter = match &log {
                Some(path) => Some(LogEmitter::to_file(path, "stress", &run_id)?),
                None => None,
            };
            if let Some(emitter) = emitter.as_mut() {
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "stress_start")
                        .with_details(serde_json::to_value(cfg)?),
                )?;
            }

            let report = measure_stress(&cfg)?;
            let verdict = check_report(&report);
            if let Some(emitter) = emitter.as_mut() {
                for thread in &report.threads {
                    emitter.emit_entry(
                        LogEntry::new("", LogLevel::Debug, "stress_thread")
                            .with_thread(thread.thread)
                            .with_details(serde_json::to_value(thread)?),
                    )?;
                }
                let (level, outcome) = if verdict.is_ok() {
                    (LogLevel::Info, Outcome::Pass)
                } else {
                    (LogLevel::Error, Outcome::Fail)
                };
                emitter.emit_entry(
                    LogEntry::new("", level, "stress_done")
                        .with_outcome(outcome)
                        .with_duration_ms(report.elapsed_ms)
                        .with_details(serde_json::json!({
                            "total_allocs": report.total_allocs,
                            "corrupted_blocks": report.corrupted_blocks,
                            "leaked_blocks": report.leaked_blocks,
                            "workload_digest": report.workload_digest,
                        })),
                )?;
                emitter.flush()?;
            }

            write_json(output, &serde_json::to_string_pretty(&report)?)?;
            verdict?;
        }
        Command::Classify { base_size, output } => {
            let map = SizeClassMap::with_base_size(base_size)?;
            let rows = classification_table(&map);
            let json = serde_json::json!({
                "base_size": map.base_size(),
                "max_fixed_size": map.max_fixed_size(),
                "pools": map.classes().count(),
                "rows": rows,
            });
            write_json(output, &serde_json::to_string_pretty(&json)?)?;
        }
    }

    Ok(())
}
