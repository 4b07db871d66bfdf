//! kvpulse CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use kvpulse::config::cli::Cli;
use kvpulse::config::{toml, validator, Config};
use kvpulse::store::{KvStore, MemoryStore};
use kvpulse::util::logging::init_logging;
use kvpulse::{output, runner};
use std::sync::Arc;
use tracing::{info, warn};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = toml::load_config(&cli).context("Failed to load configuration")?;
    init_logging(&config.runtime.log_level, config.runtime.log_dir.as_deref());

    validator::validate_config(&config).context("Configuration validation failed")?;

    println!("kvpulse v{}", env!("CARGO_PKG_VERSION"));
    println!();
    print!("{}", config);

    if config.runtime.dry_run {
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }
    println!();

    let worker_threads = config.runtime.worker_threads.unwrap_or_else(num_cpus::get);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new(config.store_config()));
    info!(store = %config.store, "Store ready");

    let report = tokio::select! {
        report = runner::run(&config, store.clone()) => report?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning the run");
            anyhow::bail!("Interrupted before the run completed");
        }
    };

    output::write_reports(&report, &config)?;

    println!("RESULT: {}", report.result_line());
    Ok(())
}
