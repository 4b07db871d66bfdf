//! CLI argument parsing using clap

use clap::Parser;
use std::path::PathBuf;

/// kvpulse - Sliding-window latency monitor for key-value store workloads
///
/// Preloads a store, drives a concurrent operation mix against it, and
/// reports per-operation latency statistics over a trailing time window.
#[derive(Parser, Debug)]
#[command(name = "kvpulse")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file (CLI flags take precedence)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    // === Workload Options ===
    /// Length of the measured phase (e.g., 30s, 5m)
    #[arg(short = 'd', long)]
    pub duration: Option<String>,

    /// Comma-separated operations (set, get, put_if_absent, is_empty)
    #[arg(short = 'o', long)]
    pub operations: Option<String>,

    /// Entries written by the preload phase
    #[arg(short = 'n', long)]
    pub num_entries: Option<u64>,

    /// Bytes per stored value (e.g., 8, 32k)
    #[arg(long)]
    pub value_size: Option<String>,

    // === Statistics Options ===
    /// Trailing statistics window (e.g., 30s, 1m)
    #[arg(short = 'w', long)]
    pub window: Option<String>,

    /// Buckets per window
    #[arg(long)]
    pub buckets: Option<usize>,

    /// Slow-state refresh period (defaults to the window length)
    #[arg(long)]
    pub refresh_interval: Option<String>,

    /// Ingestion queue capacity per operation
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    // === Driver Options ===
    /// Cap on in-flight operations
    #[arg(short = 'm', long)]
    pub max_concurrency: Option<usize>,

    /// Dispatch retry backoff at the concurrency cap (e.g., 5ms)
    #[arg(long)]
    pub backoff: Option<String>,

    /// Bound on waiting for in-flight work when draining (e.g., 2s)
    #[arg(long)]
    pub drain_timeout: Option<String>,

    // === Store Options ===
    /// Simulated mean store latency (e.g., 1ms, 500us)
    #[arg(long)]
    pub latency: Option<String>,

    /// Simulated latency standard deviation
    #[arg(long)]
    pub latency_jitter: Option<String>,

    /// Probability in [0, 1] that a store operation fails
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// RNG seed for reproducible latency and failures
    #[arg(long)]
    pub seed: Option<u64>,

    // === Output Options ===
    /// Write the CSV report to this file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write the JSON report to this file
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Suppress the console summary
    #[arg(short = 'Q', long)]
    pub quiet: bool,

    // === Runtime Options ===
    /// Use the small local test sizes
    #[arg(long, conflicts_with = "production")]
    pub local_test_mode: bool,

    /// Use the production sizes
    #[arg(long)]
    pub production: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "KVPULSE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Directory for daily-rotated log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Tokio worker threads (default: CPU count)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Validate and print the configuration, then exit
    #[arg(long)]
    pub dry_run: bool,
}
