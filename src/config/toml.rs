//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::{parse_duration, parse_operations, parse_size};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<Config> {
    let config: Config =
        ::toml::from_str(contents).context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Render a configuration back to TOML
pub fn to_toml_string(config: &Config) -> Result<String> {
    ::toml::to_string_pretty(config).context("Failed to serialize configuration")
}

/// Build the effective configuration: file (if any), then CLI overrides
pub fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => Config::default(),
    };
    merge_cli_with_config(cli, config)
}

/// Merge CLI arguments with TOML configuration (CLI takes precedence)
pub fn merge_cli_with_config(cli: &Cli, mut config: Config) -> Result<Config> {
    // Workload
    if let Some(ref duration) = cli.duration {
        config.workload.duration =
            Some(parse_duration(duration).context("Invalid --duration")?);
    }
    if let Some(ref operations) = cli.operations {
        config.workload.operations = parse_operations(operations)?;
    }
    if let Some(num_entries) = cli.num_entries {
        config.workload.num_entries = Some(num_entries);
    }
    if let Some(ref value_size) = cli.value_size {
        let bytes = parse_size(value_size).context("Invalid --value-size")?;
        config.workload.value_size =
            Some(usize::try_from(bytes).context("--value-size does not fit in memory")?);
    }

    // Statistics
    if let Some(ref window) = cli.window {
        config.stats.window = Some(parse_duration(window).context("Invalid --window")?);
    }
    if let Some(buckets) = cli.buckets {
        config.stats.num_buckets = buckets;
    }
    if let Some(ref refresh) = cli.refresh_interval {
        config.stats.refresh_interval =
            Some(parse_duration(refresh).context("Invalid --refresh-interval")?);
    }
    if let Some(capacity) = cli.queue_capacity {
        config.stats.queue_capacity = capacity;
    }

    // Driver
    if let Some(max) = cli.max_concurrency {
        config.driver.max_concurrency = Some(max);
    }
    if let Some(ref backoff) = cli.backoff {
        config.driver.backoff = parse_duration(backoff).context("Invalid --backoff")?;
    }
    if let Some(ref timeout) = cli.drain_timeout {
        config.driver.drain_timeout =
            parse_duration(timeout).context("Invalid --drain-timeout")?;
    }

    // Store
    if let Some(ref latency) = cli.latency {
        config.store.latency = parse_duration(latency).context("Invalid --latency")?;
    }
    if let Some(ref jitter) = cli.latency_jitter {
        config.store.latency_jitter =
            parse_duration(jitter).context("Invalid --latency-jitter")?;
    }
    if let Some(rate) = cli.failure_rate {
        config.store.failure_rate = rate;
    }
    if let Some(seed) = cli.seed {
        config.store.seed = Some(seed);
    }

    // Output
    if let Some(ref path) = cli.csv {
        config.output.csv = Some(path.clone());
    }
    if let Some(ref path) = cli.json {
        config.output.json = Some(path.clone());
    }
    if cli.quiet {
        config.output.quiet = true;
    }

    // Runtime
    if cli.local_test_mode {
        config.runtime.local_test_mode = true;
    }
    if cli.production {
        config.runtime.local_test_mode = false;
    }
    if let Some(ref level) = cli.log_level {
        config.runtime.log_level = level.clone();
    }
    if let Some(ref dir) = cli.log_dir {
        config.runtime.log_dir = Some(dir.clone());
    }
    if let Some(workers) = cli.workers {
        config.runtime.worker_threads = Some(workers);
    }
    if cli.dry_run {
        config.runtime.dry_run = true;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_empty_toml_gives_defaults() {
        let config = parse_toml_string("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[workload]
operations = ["set", "put_if_absent"]
num_entries = 4096
value_size = 64
duration = "45s"

[stats]
window = "10s"
num_buckets = 10
refresh_interval = "500ms"

[driver]
max_concurrency = 8
backoff = "2ms"

[store]
latency = "200us"
failure_rate = 0.05
seed = 42

[output]
csv = "results.csv"

[runtime]
local_test_mode = false
log_level = "debug"
"#;

        let config = parse_toml_string(toml_str).unwrap();
        assert_eq!(
            config.workload.operations,
            vec![OperationKind::Set, OperationKind::PutIfAbsent]
        );
        assert_eq!(config.num_entries(), 4096);
        assert_eq!(config.value_size(), 64);
        assert_eq!(config.measure_duration(), Duration::from_secs(45));
        assert_eq!(config.window(), Duration::from_secs(10));
        assert_eq!(config.stats.num_buckets, 10);
        assert_eq!(
            config.stats.refresh_interval,
            Some(Duration::from_millis(500))
        );
        assert_eq!(config.max_concurrency(), 8);
        assert_eq!(config.driver.backoff, Duration::from_millis(2));
        assert_eq!(config.driver.drain_timeout, Duration::from_secs(2));
        assert_eq!(config.store.latency, Duration::from_micros(200));
        assert_eq!(config.store.seed, Some(42));
        assert_eq!(config.output.csv, Some(PathBuf::from("results.csv")));
        assert!(!config.runtime.local_test_mode);
        assert_eq!(config.runtime.log_level, "debug");
    }

    #[test]
    fn test_parse_invalid_duration() {
        let result = parse_toml_string("[stats]\nwindow = \"forever\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_unknown_operation() {
        let result = parse_toml_string("[workload]\noperations = [\"delete\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = Config::default();
        config.stats.window = Some(Duration::from_millis(1500));
        config.store.seed = Some(9);

        let rendered = to_toml_string(&config).unwrap();
        assert_eq!(parse_toml_string(&rendered).unwrap(), config);
    }

    #[test]
    fn test_parse_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[driver]\nmax_concurrency = 3").unwrap();

        let config = parse_toml_file(file.path()).unwrap();
        assert_eq!(config.max_concurrency(), 3);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = parse_toml_file(Path::new("/nonexistent/kvpulse.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/kvpulse.toml"));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[driver]\nmax_concurrency = 3\n[stats]\nnum_buckets = 5").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let cli = Cli::try_parse_from([
            "kvpulse",
            "--config",
            path.as_str(),
            "-m",
            "12",
            "--value-size",
            "1k",
            "--production",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.max_concurrency(), 12);
        assert_eq!(config.stats.num_buckets, 5);
        assert_eq!(config.value_size(), 1024);
        assert!(!config.runtime.local_test_mode);
    }

    #[test]
    fn test_invalid_cli_duration() {
        let cli = Cli::try_parse_from(["kvpulse", "--window", "abc"]).unwrap();
        assert!(load_config(&cli).is_err());
    }
}
