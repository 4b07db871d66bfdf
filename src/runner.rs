//! Run phases
//!
//! A run fills the store, drives the configured operations until every
//! statistics window has filled, captures a baseline, measures for the
//! configured duration, drains and reports:
//!
//! ```text
//! Preload -> MinPopulation -> Baseline -> Measure -> Drain -> Reported
//! ```
//!
//! The result line joins the sizing parameters with the baseline and final
//! CSV: `num_entries,value_size,measure_secs,<baseline>,<final>`.

use crate::config::Config;
use crate::driver::{ConcurrencyBoundedDriver, DriverSettings};
use crate::stats::{WindowConfig, WindowStats};
use crate::store::{Key, KvStore, StoreResult};
use crate::util::time::{format_count, format_duration, Stopwatch};
use crate::worker::ops::SetOp;
use crate::worker::{build_operation, KeyBoundary, TimedTask};
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Local};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// First key written by the preload phase
pub const FIRST_KEY: Key = 0;

/// How often stage conditions are checked
const STAGE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// How often the preload driver logs its stats
const PRELOAD_STATS_INTERVAL: Duration = Duration::from_secs(2);

/// How often the measure phase logs progress
const PROGRESS_INTERVAL: Duration = Duration::from_secs(4);

/// Attempts for a single setup call against the store before giving up
const STORE_RETRY_ATTEMPTS: u32 = 10;

/// Wait between setup attempts
const STORE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Stage of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Preload,
    MinPopulation,
    Baseline,
    Measure,
    Drain,
    Reported,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Preload => "PRELOAD",
            RunStage::MinPopulation => "MINPOP",
            RunStage::Baseline => "BASELINE",
            RunStage::Measure => "MEASURE",
            RunStage::Drain => "DRAIN",
            RunStage::Reported => "REPORTED",
        };
        f.write_str(name)
    }
}

/// Which snapshot of a run a result row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Baseline,
    Final,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Baseline => write!(f, "baseline"),
            Phase::Final => write!(f, "final"),
        }
    }
}

/// Statistics of one operation at one phase
#[derive(Debug, Clone, PartialEq)]
pub struct OperationReport {
    pub operation: String,
    pub phase: Phase,
    pub stats: WindowStats,
    pub invocations: u64,
    pub failures: u64,
}

impl OperationReport {
    fn capture(task: &TimedTask, phase: Phase) -> Self {
        Self {
            operation: task.name().to_string(),
            phase,
            stats: task.snapshot(),
            invocations: task.invocations(),
            failures: task.failures(),
        }
    }
}

/// Outcome of a complete run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
    pub num_entries: u64,
    pub value_size: usize,
    /// Entries the store held when preload finished
    pub preloaded_entries: usize,
    pub key_boundary: KeyBoundary,
    pub measure_duration: Duration,
    pub window: Duration,
    pub baseline: Vec<OperationReport>,
    pub final_stats: Vec<OperationReport>,
    pub baseline_csv: String,
    pub final_csv: String,
    /// Invocations cancelled by the final drain
    pub cancelled: usize,
}

impl RunReport {
    /// `num_entries,value_size,measure_secs,<baseline csv>,<final csv>`
    pub fn result_line(&self) -> String {
        [
            self.num_entries.to_string(),
            self.value_size.to_string(),
            self.measure_duration.as_secs().to_string(),
            self.baseline_csv.clone(),
            self.final_csv.clone(),
        ]
        .join(",")
    }

    /// Baseline rows followed by final rows
    pub fn rows(&self) -> impl Iterator<Item = &OperationReport> {
        self.baseline.iter().chain(self.final_stats.iter())
    }
}

/// Fill the store to `num_entries` with a dedicated set driver
///
/// Returns the range of keys written, which `put_if_absent` and `get` cycle
/// through.
pub async fn preload(
    store: Arc<dyn KvStore>,
    num_entries: u64,
    value_size: usize,
    window: WindowConfig,
    settings: DriverSettings,
) -> Result<(KeyBoundary, usize)> {
    info!("Clearing store");
    with_retries("clear store", || store.clear()).await?;
    info!("Store is cleared");

    info!(
        "+++ TARGET STORE SIZE -> {} (approx {:.1}MB) +++",
        format_count(num_entries),
        num_entries as f64 * value_size as f64 / 1024.0 / 1024.0
    );

    let set_op = Arc::new(SetOp::new(store.clone(), value_size, FIRST_KEY).quiet_loader());
    let task = Arc::new(TimedTask::new(Box::new(set_op.clone()), window));
    let driver = ConcurrencyBoundedDriver::new(
        "preload",
        vec![task],
        settings.with_stats_log_interval(PRELOAD_STATS_INTERVAL),
    );
    driver.start()?;

    let mut size = 0usize;
    while (size as u64) < num_entries {
        tokio::time::sleep(STAGE_CHECK_INTERVAL).await;
        match store.len().await {
            Ok(len) => {
                size = len;
                info!("STORE SIZE={}", format_count(size as u64));
            }
            Err(e) => warn!(error = %e, "Store size check failed"),
        }
    }

    driver.close().await?;

    // Keys below next_key() whose last write failed are written now, so the
    // boundary holds only keys that are present
    let pending = set_op.take_failed_keys();
    if !pending.is_empty() {
        info!("Rewriting {} keys whose preload write failed", pending.len());
    }
    for key in pending {
        with_retries("rewrite preload key", || store.set(key, set_op.value().clone())).await?;
    }

    let boundary = KeyBoundary::new(FIRST_KEY, set_op.next_key())
        .context("Preload finished without writing any keys")?;
    let size = with_retries("read final store size", || store.len()).await?;
    info!("+++ ACTUAL STORE SIZE -> {} +++", format_count(size as u64));

    Ok((boundary, size))
}

/// Retry a setup call against the store, warning on each failure
async fn with_retries<T, F, Fut>(what: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < STORE_RETRY_ATTEMPTS => {
                warn!(error = %e, attempt, "Failed to {}, retrying", what);
                attempt += 1;
                tokio::time::sleep(STORE_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to {} after {} attempts", what, attempt))
            }
        }
    }
}

/// Execute a complete run against `store`
pub async fn run(config: &Config, store: Arc<dyn KvStore>) -> Result<RunReport> {
    let started_at = Local::now();
    let run_clock = Stopwatch::start();
    let window = config.window_config();
    let settings = config.driver_settings();
    let num_entries = config.num_entries();
    let value_size = config.value_size();
    let measure_duration = config.measure_duration();

    info!(stage = %RunStage::Preload, store = store.name(), "Preloading store");
    let (key_boundary, preloaded_entries) =
        preload(store.clone(), num_entries, value_size, window, settings).await?;

    let tasks: Vec<Arc<TimedTask>> = config
        .workload
        .operations
        .iter()
        .map(|kind| {
            let op = build_operation(*kind, store.clone(), value_size, key_boundary, key_boundary.last);
            Arc::new(TimedTask::new(op, window))
        })
        .collect();
    let names = tasks
        .iter()
        .map(|task| task.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let driver = ConcurrencyBoundedDriver::new("latencyTest", tasks, settings);
    driver.start()?;
    info!(stage = %RunStage::MinPopulation, "Running {} against the store", names);
    info!("Will continue until min stats population reached for each operation");

    let mut progress = Stopwatch::with_period(PROGRESS_INTERVAL);
    while !driver.reached_minimum_stats_population() {
        tokio::time::sleep(STAGE_CHECK_INTERVAL).await;
        if progress.is_time_over() {
            debug!("Waiting for minimum population: {}", driver.tasks_to_stats_string());
        }
    }

    info!(stage = %RunStage::Baseline, "Capturing baseline stats");
    let baseline_csv = driver.tasks_to_csv();
    let baseline: Vec<OperationReport> = driver
        .tasks()
        .iter()
        .map(|task| OperationReport::capture(task, Phase::Baseline))
        .collect();
    info!("Stats with min pop reached: {}", driver.tasks_to_stats_string());

    info!("Resetting stats before the measured phase");
    for task in driver.tasks() {
        task.clear_stats().await?;
    }
    info!("Stats after reset: {}", driver.tasks_to_stats_string());

    info!(
        stage = %RunStage::Measure,
        "Measuring for {}",
        format_duration(measure_duration)
    );
    let measure_clock = Stopwatch::start();
    let mut progress = Stopwatch::with_period(PROGRESS_INTERVAL);
    while measure_clock.elapsed() < measure_duration {
        let remaining = measure_duration.saturating_sub(measure_clock.elapsed());
        tokio::time::sleep(remaining.min(STAGE_CHECK_INTERVAL)).await;
        if progress.is_time_over() {
            debug!(
                remaining = ?measure_duration.saturating_sub(measure_clock.elapsed()),
                "Measuring"
            );
        }
    }

    info!(stage = %RunStage::Drain, "Draining remaining tasks");
    let final_csv = driver.drain_and_get_stats().await?;
    let final_stats: Vec<OperationReport> = driver
        .tasks()
        .iter()
        .map(|task| OperationReport::capture(task, Phase::Final))
        .collect();

    let report = RunReport {
        started_at,
        elapsed: run_clock.elapsed(),
        num_entries,
        value_size,
        preloaded_entries,
        key_boundary,
        measure_duration,
        window: window.window,
        baseline,
        final_stats,
        baseline_csv,
        final_csv,
        cancelled: driver.last_drain().cancelled,
    };

    info!(stage = %RunStage::Reported, "RESULT {}", report.result_line());
    for task in driver.tasks() {
        task.clear_stats().await?;
    }
    driver.close().await?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::workload::OperationKind;
    use crate::store::{MemoryStore, MemoryStoreConfig, StoreError, StoreResult, Value};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.workload.operations = vec![OperationKind::IsEmpty, OperationKind::PutIfAbsent];
        config.workload.num_entries = Some(64);
        config.workload.value_size = Some(8);
        config.workload.duration = Some(Duration::from_secs(2));
        config.stats.window = Some(Duration::from_secs(1));
        config.stats.num_buckets = 10;
        config.driver.max_concurrency = Some(4);
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_fills_store() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        let (boundary, size) = preload(
            store.clone(),
            100,
            4,
            WindowConfig::new(Duration::from_secs(1), 10),
            DriverSettings::new(8),
        )
        .await
        .unwrap();

        assert!(size >= 100);
        assert_eq!(boundary.first, FIRST_KEY);
        assert_eq!(boundary.len() as usize, size);
        assert_eq!(store.len().await.unwrap(), size);
    }

    fn unreliable_store(seed: u64) -> Arc<dyn KvStore> {
        Arc::new(MemoryStore::new(MemoryStoreConfig {
            failure_rate: 0.1,
            seed: Some(seed),
            ..MemoryStoreConfig::default()
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_survives_store_failures() {
        for seed in 0..20 {
            let store = unreliable_store(seed);
            let result = preload(
                store,
                50,
                4,
                WindowConfig::new(Duration::from_secs(1), 10),
                DriverSettings::new(4),
            )
            .await;
            assert!(result.is_ok(), "seed {}: {:#}", seed, result.unwrap_err());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_boundary_holds_only_written_keys() {
        for seed in 0..5 {
            let store = unreliable_store(seed);
            let (boundary, _) = preload(
                store.clone(),
                80,
                4,
                WindowConfig::new(Duration::from_secs(1), 10),
                DriverSettings::new(8),
            )
            .await
            .unwrap();

            for key in boundary.first..boundary.last {
                let value = loop {
                    match store.get(key).await {
                        Ok(value) => break value,
                        Err(e) => assert_ne!(e.kind(), "KeyMissing"),
                    }
                };
                assert!(value.is_some(), "seed {}: key {} never written", seed, key);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        let report = run(&test_config(), store).await.unwrap();

        assert!(report.preloaded_entries >= 64);
        assert_eq!(report.baseline.len(), 2);
        assert_eq!(report.final_stats.len(), 2);
        assert_eq!(report.rows().count(), 4);
        assert_eq!(report.cancelled, 0);

        // Baseline is captured only after every window has filled
        for row in &report.baseline {
            assert!(row.stats.has_updated_after_window_filled);
            assert!(row.stats.n > 0);
        }
        for row in &report.final_stats {
            assert_eq!(row.failures, 0, "{} failed", row.operation);
            assert!(row.stats.n > 0);
        }

        let line = report.result_line();
        assert!(line.starts_with("64,8,2,"));
        assert_eq!(line.split(',').count(), 3 + 2 * 5 + 2 * 5);
    }

    /// Fails every third emptiness check
    struct FlakyStore {
        inner: MemoryStore,
        checks: AtomicU64,
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn get(&self, key: Key) -> StoreResult<Option<Value>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: Key, value: Value) -> StoreResult<()> {
            self.inner.set(key, value).await
        }

        async fn put_if_absent(&self, key: Key, value: Value) -> StoreResult<Option<Value>> {
            self.inner.put_if_absent(key, value).await
        }

        async fn is_empty(&self) -> StoreResult<bool> {
            if self.checks.fetch_add(1, Ordering::Relaxed) % 3 == 2 {
                return Err(StoreError::Timeout {
                    after: Duration::from_millis(1),
                });
            }
            self.inner.is_empty().await
        }

        async fn len(&self) -> StoreResult<usize> {
            self.inner.len().await
        }

        async fn clear(&self) -> StoreResult<()> {
            self.inner.clear().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_counts_store_failures() {
        let mut config = test_config();
        config.workload.operations = vec![OperationKind::IsEmpty];
        let store: Arc<dyn KvStore> = Arc::new(FlakyStore {
            inner: MemoryStore::default(),
            checks: AtomicU64::new(0),
        });

        let report = run(&config, store).await.unwrap();
        let row = &report.final_stats[0];
        assert_eq!(row.operation, "isEmpty");
        assert!(row.failures > 0);
        assert!(row.stats.n > 0);
    }

    #[test]
    fn test_result_line_format() {
        let report = RunReport {
            started_at: Local::now(),
            elapsed: Duration::from_secs(1),
            num_entries: 1024,
            value_size: 8,
            preloaded_entries: 1024,
            key_boundary: KeyBoundary::new(0, 1024).unwrap(),
            measure_duration: Duration::from_secs(30),
            window: Duration::from_secs(30),
            baseline: Vec::new(),
            final_stats: Vec::new(),
            baseline_csv: "10,1.000,,,".to_string(),
            final_csv: "12,2.000,0.500,1.000,3.000".to_string(),
            cancelled: 0,
        };
        assert_eq!(
            report.result_line(),
            "1024,8,30,10,1.000,,,,12,2.000,0.500,1.000,3.000"
        );
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(RunStage::MinPopulation.to_string(), "MINPOP");
        assert_eq!(Phase::Final.to_string(), "final");
    }
}
