//! Configuration module
//!
//! Handles CLI argument parsing, TOML configuration files, and validation.
//!
//! Settings are layered: built-in defaults (which depend on the run
//! [`Profile`]), then an optional TOML file, then CLI flags. Sizes that differ
//! between the local test profile and a production run are kept as `Option`
//! here and resolved through the accessor methods on [`Config`].

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;
pub mod workload;

use crate::driver::DriverSettings;
use crate::stats::WindowConfig;
use crate::store::MemoryStoreConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use workload::*;

/// Complete run configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// What the measured phase runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Operations driven concurrently, one TimedTask each
    #[serde(default = "default_operations")]
    pub operations: Vec<OperationKind>,
    /// Entries written by the preload phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_entries: Option<u64>,
    /// Bytes per stored value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_size: Option<usize>,
    /// Length of the measured phase
    #[serde(
        default,
        with = "duration_str::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,
}

fn default_operations() -> Vec<OperationKind> {
    vec![OperationKind::IsEmpty, OperationKind::PutIfAbsent]
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            operations: default_operations(),
            num_entries: None,
            value_size: None,
            duration: None,
        }
    }
}

/// Sliding-window statistics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Trailing window length
    #[serde(
        default,
        with = "duration_str::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub window: Option<Duration>,
    /// Buckets per window
    #[serde(default = "default_num_buckets")]
    pub num_buckets: usize,
    /// Slow-state refresh period (defaults to the window length)
    #[serde(
        default,
        with = "duration_str::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_interval: Option<Duration>,
    /// Ingestion queue capacity per engine
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_num_buckets() -> usize {
    WindowConfig::DEFAULT_NUM_BUCKETS
}

fn default_queue_capacity() -> usize {
    WindowConfig::DEFAULT_QUEUE_CAPACITY
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            window: None,
            num_buckets: default_num_buckets(),
            refresh_interval: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Concurrency-bounded driver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Cap on in-flight operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    /// Wait before retrying dispatch at the cap
    #[serde(default = "default_backoff", with = "duration_str")]
    pub backoff: Duration,
    /// Period of the aggregate stats log line
    #[serde(default = "default_stats_log_interval", with = "duration_str")]
    pub stats_log_interval: Duration,
    /// Bound on waiting for in-flight work when draining
    #[serde(default = "default_drain_timeout", with = "duration_str")]
    pub drain_timeout: Duration,
}

fn default_backoff() -> Duration {
    DriverSettings::DEFAULT_BACKOFF
}

fn default_stats_log_interval() -> Duration {
    DriverSettings::DEFAULT_STATS_LOG_INTERVAL
}

fn default_drain_timeout() -> Duration {
    DriverSettings::DEFAULT_DRAIN_TIMEOUT
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            backoff: default_backoff(),
            stats_log_interval: default_stats_log_interval(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

/// Simulated store parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_latency", with = "duration_str")]
    pub latency: Duration,
    #[serde(default = "default_latency_jitter", with = "duration_str")]
    pub latency_jitter: Duration,
    /// Probability in `[0, 1]` that an operation fails
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_latency() -> Duration {
    MemoryStoreConfig::default().latency
}

fn default_latency_jitter() -> Duration {
    MemoryStoreConfig::default().latency_jitter
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            latency: default_latency(),
            latency_jitter: default_latency_jitter(),
            failure_rate: 0.0,
            seed: None,
        }
    }
}

/// Report destinations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// CSV report path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csv: Option<PathBuf>,
    /// JSON report path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<PathBuf>,
    /// Suppress the console summary
    #[serde(default)]
    pub quiet: bool,
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Small sizes for a quick local run
    #[serde(default = "default_local_test_mode")]
    pub local_test_mode: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rotated log files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Tokio worker threads (defaults to the CPU count)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
    /// Validate and print the configuration, then exit
    #[serde(skip)]
    pub dry_run: bool,
}

fn default_local_test_mode() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local_test_mode: default_local_test_mode(),
            log_level: default_log_level(),
            log_dir: None,
            worker_threads: None,
            dry_run: false,
        }
    }
}

impl Config {
    pub fn profile(&self) -> Profile {
        Profile::from_local_test_mode(self.runtime.local_test_mode)
    }

    pub fn num_entries(&self) -> u64 {
        self.workload
            .num_entries
            .unwrap_or_else(|| self.profile().num_entries())
    }

    pub fn value_size(&self) -> usize {
        self.workload
            .value_size
            .unwrap_or_else(|| self.profile().value_size())
    }

    pub fn measure_duration(&self) -> Duration {
        self.workload
            .duration
            .unwrap_or_else(|| self.profile().measure_duration())
    }

    pub fn window(&self) -> Duration {
        self.stats.window.unwrap_or_else(|| self.profile().window())
    }

    pub fn max_concurrency(&self) -> usize {
        self.driver
            .max_concurrency
            .unwrap_or_else(|| self.profile().max_concurrency())
    }

    /// Window settings shared by every TimedTask engine
    pub fn window_config(&self) -> WindowConfig {
        let window = self.window();
        WindowConfig::new(window, self.stats.num_buckets)
            .with_refresh_interval(self.stats.refresh_interval.unwrap_or(window))
            .with_queue_capacity(self.stats.queue_capacity)
    }

    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            max_concurrency: self.max_concurrency(),
            backoff: self.driver.backoff,
            stats_log_interval: self.driver.stats_log_interval,
            drain_timeout: self.driver.drain_timeout,
        }
    }

    pub fn store_config(&self) -> MemoryStoreConfig {
        MemoryStoreConfig {
            latency: self.store.latency,
            latency_jitter: self.store.latency_jitter,
            failure_rate: self.store.failure_rate,
            seed: self.store.seed,
        }
    }
}

// Display trait implementations

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration ({}):", self.profile())?;
        writeln!(
            f,
            "  Workload: operations=[{}], entries={}, value_size={}, duration={}",
            self.workload
                .operations
                .iter()
                .map(|op| op.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            self.num_entries(),
            self.value_size(),
            cli_convert::duration_to_string(self.measure_duration())
        )?;
        writeln!(
            f,
            "  Stats: window={}, buckets={}, refresh={}, queue={}",
            cli_convert::duration_to_string(self.window()),
            self.stats.num_buckets,
            cli_convert::duration_to_string(self.stats.refresh_interval.unwrap_or(self.window())),
            self.stats.queue_capacity
        )?;
        writeln!(
            f,
            "  Driver: max_concurrency={}, backoff={}, stats_log={}, drain_timeout={}",
            self.max_concurrency(),
            cli_convert::duration_to_string(self.driver.backoff),
            cli_convert::duration_to_string(self.driver.stats_log_interval),
            cli_convert::duration_to_string(self.driver.drain_timeout)
        )?;
        writeln!(f, "  Store: {}", self.store)?;
        writeln!(f, "  Output: {}", self.output)?;
        writeln!(
            f,
            "  Runtime: log_level={}, workers={}",
            self.runtime.log_level,
            self.runtime
                .worker_threads
                .map_or_else(|| "auto".to_string(), |n| n.to_string())
        )?;
        Ok(())
    }
}

impl fmt::Display for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "memory (latency={}, jitter={}, failure_rate={}",
            cli_convert::duration_to_string(self.latency),
            cli_convert::duration_to_string(self.latency_jitter),
            self.failure_rate
        )?;
        if let Some(seed) = self.seed {
            write!(f, ", seed={}", seed)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for OutputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.quiet {
            parts.push("console".to_string());
        }
        if let Some(ref path) = self.csv {
            parts.push(format!("csv={}", path.display()));
        }
        if let Some(ref path) = self.json {
            parts.push(format!("json={}", path.display()));
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

/// Serde adapter storing durations as human strings ("30s", "250ms")
mod duration_str {
    use super::cli_convert::{duration_to_string, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&duration_to_string(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(|e| serde::de::Error::custom(format!("{:#}", e)))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match duration {
                Some(d) => serializer.serialize_some(&duration_to_string(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| parse_duration(&raw))
                .transpose()
                .map_err(|e| serde::de::Error::custom(format!("{:#}", e)))
        }
    }
}
