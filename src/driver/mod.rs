//! Concurrency-bounded operation driver
//!
//! `ConcurrencyBoundedDriver` keeps a set of [`TimedTask`]s busy. A single
//! dispatch loop rotates over the tasks and spawns one invocation at a time,
//! as long as fewer than `max_concurrency` invocations are in flight. At the
//! cap it backs off for a fixed interval and tries again.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start()--> Running --drain()--> Draining --close()--> Closed
//! ```
//!
//! - **Running**: dispatch loop and periodic stats log are active
//! - **Draining**: no new invocations; in-flight work gets `drain_timeout` to
//!   finish before it is cancelled
//! - **Closed**: every task's statistics engine is closed
//!
//! # Example
//!
//! ```no_run
//! use kvpulse::driver::{ConcurrencyBoundedDriver, DriverSettings};
//! use kvpulse::stats::WindowConfig;
//! use kvpulse::store::{KvStore, MemoryStore};
//! use kvpulse::worker::{ops::IsEmptyOp, TimedTask};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
//! let task = TimedTask::new(
//!     Box::new(IsEmptyOp::new(store)),
//!     WindowConfig::new(Duration::from_secs(30), 20),
//! );
//!
//! let driver = ConcurrencyBoundedDriver::new("main", vec![Arc::new(task)], DriverSettings::new(16));
//! driver.start()?;
//! tokio::time::sleep(Duration::from_secs(10)).await;
//! println!("{}", driver.drain_and_get_stats().await?);
//! driver.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::worker::TimedTask;
use crate::Result;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Driver tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverSettings {
    /// Cap on in-flight invocations
    pub max_concurrency: usize,
    /// Wait before retrying dispatch at the cap
    pub backoff: Duration,
    /// Period of the aggregate stats log line
    pub stats_log_interval: Duration,
    /// Bound on waiting for in-flight work when draining
    pub drain_timeout: Duration,
}

impl DriverSettings {
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(5);
    pub const DEFAULT_STATS_LOG_INTERVAL: Duration = Duration::from_secs(4);
    pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            backoff: Self::DEFAULT_BACKOFF,
            stats_log_interval: Self::DEFAULT_STATS_LOG_INTERVAL,
            drain_timeout: Self::DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_stats_log_interval(mut self, interval: Duration) -> Self {
        self.stats_log_interval = interval;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
    Draining,
    Closed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "idle"),
            DriverState::Running => write!(f, "running"),
            DriverState::Draining => write!(f, "draining"),
            DriverState::Closed => write!(f, "closed"),
        }
    }
}

/// How a drain ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Invocations still running at the timeout and cancelled
    pub cancelled: usize,
}

impl DrainReport {
    pub fn timed_out(&self) -> bool {
        self.cancelled > 0
    }
}

/// `to_csv()` of every task, comma-joined
pub fn tasks_to_csv(tasks: &[Arc<TimedTask>]) -> String {
    tasks
        .iter()
        .map(|task| task.to_csv())
        .collect::<Vec<_>>()
        .join(",")
}

/// `to_stats_string()` of every task, joined with "; "
pub fn tasks_to_stats_string(tasks: &[Arc<TimedTask>]) -> String {
    tasks
        .iter()
        .map(|task| task.to_stats_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// State shared with the dispatch loop and the spawned invocations
struct Shared {
    name: String,
    tasks: Vec<Arc<TimedTask>>,
    settings: DriverSettings,
    stop_flag: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    dispatched: AtomicU64,
}

impl Shared {
    /// Claim an in-flight slot if one is free
    fn try_admit(&self) -> bool {
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.settings.max_concurrency).then_some(n + 1)
            });
        match admitted {
            Ok(previous) => {
                self.peak_in_flight.fetch_max(previous + 1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }
}

/// Releases an in-flight slot when the invocation ends or is cancelled
struct InFlightGuard(Arc<Shared>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs TimedTasks round-robin under a concurrency cap
pub struct ConcurrencyBoundedDriver {
    shared: Arc<Shared>,
    state: Mutex<DriverState>,
    last_drain: Mutex<DrainReport>,
    dispatcher: Mutex<Option<JoinHandle<JoinSet<()>>>>,
    stats_logger: Mutex<Option<JoinHandle<()>>>,
}

impl ConcurrencyBoundedDriver {
    pub fn new(name: impl Into<String>, tasks: Vec<Arc<TimedTask>>, settings: DriverSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                tasks,
                settings,
                stop_flag: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                dispatched: AtomicU64::new(0),
            }),
            state: Mutex::new(DriverState::Idle),
            last_drain: Mutex::new(DrainReport::default()),
            dispatcher: Mutex::new(None),
            stats_logger: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn tasks(&self) -> &[Arc<TimedTask>] {
        &self.shared.tasks
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> DriverState {
        *self.state.lock().unwrap()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Highest in-flight count observed
    pub fn peak_in_flight(&self) -> usize {
        self.shared.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Outcome of the drain that stopped this driver
    pub fn last_drain(&self) -> DrainReport {
        *self.last_drain.lock().unwrap()
    }

    /// Invocations spawned so far
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched.load(Ordering::Relaxed)
    }

    /// Start dispatching and periodic stats logging
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != DriverState::Idle {
                anyhow::bail!("Driver '{}' cannot start while {}", self.shared.name, state);
            }
            if self.shared.tasks.is_empty() {
                anyhow::bail!("Driver '{}' has no tasks to run", self.shared.name);
            }
            if self.shared.settings.max_concurrency == 0 {
                anyhow::bail!("Driver '{}' has max_concurrency 0", self.shared.name);
            }
            *state = DriverState::Running;
        }

        info!(
            driver = %self.shared.name,
            tasks = self.shared.tasks.len(),
            max_concurrency = self.shared.settings.max_concurrency,
            "Starting up operations"
        );

        let dispatcher = tokio::spawn(dispatch_loop(self.shared.clone()));
        *self.dispatcher.lock().unwrap() = Some(dispatcher);

        let logger = tokio::spawn(stats_log_loop(self.shared.clone()));
        *self.stats_logger.lock().unwrap() = Some(logger);

        Ok(())
    }

    /// Every task has computed slow state over a full window
    pub fn reached_minimum_stats_population(&self) -> bool {
        self.shared
            .tasks
            .iter()
            .all(|task| task.has_reached_minimum_population())
    }

    /// Stop dispatching and wait (bounded) for in-flight work
    ///
    /// Invocations still running after `drain_timeout` are cancelled.
    /// Draining an idle or already drained driver is a no-op.
    pub async fn drain(&self) -> Result<DrainReport> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                DriverState::Running => *state = DriverState::Draining,
                DriverState::Idle => {
                    *state = DriverState::Draining;
                    return Ok(DrainReport::default());
                }
                DriverState::Draining | DriverState::Closed => return Ok(DrainReport::default()),
            }
        }

        self.shared.stop_flag.store(true, Ordering::Release);

        let stats_logger = self.stats_logger.lock().unwrap().take();
        if let Some(handle) = stats_logger {
            handle.abort();
        }

        let dispatcher = self.dispatcher.lock().unwrap().take();
        let Some(dispatcher) = dispatcher else {
            return Ok(DrainReport::default());
        };
        let mut in_flight = dispatcher
            .await
            .map_err(|e| anyhow::anyhow!("Dispatch loop for '{}' failed: {}", self.shared.name, e))?;

        let timeout = self.shared.settings.drain_timeout;
        let waited = tokio::time::timeout(timeout, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join_result(&self.shared.name, joined);
            }
        })
        .await;

        let mut report = DrainReport::default();
        if waited.is_err() {
            report.cancelled = in_flight.len();
            warn!(
                driver = %self.shared.name,
                cancelled = report.cancelled,
                "Timed out waiting for termination in drain() after {:?}",
                timeout
            );
            in_flight.abort_all();
            while in_flight.join_next().await.is_some() {}
        }

        debug!(
            driver = %self.shared.name,
            dispatched = self.dispatched(),
            "Drained"
        );
        *self.last_drain.lock().unwrap() = report;
        Ok(report)
    }

    /// Drain, then refresh every task and return their CSV, comma-joined
    pub async fn drain_and_get_stats(&self) -> Result<String> {
        self.drain().await?;
        for task in &self.shared.tasks {
            task.refresh().await?;
        }
        Ok(self.tasks_to_csv())
    }

    /// Drain if needed, then close every task's statistics engine
    pub async fn close(&self) -> Result<()> {
        if self.state() == DriverState::Closed {
            return Ok(());
        }
        self.drain().await?;

        let mut first_error = None;
        for task in &self.shared.tasks {
            if let Err(e) = task.close().await {
                error!(driver = %self.shared.name, task = task.name(), error = %e, "Closing task failed");
                first_error.get_or_insert(e);
            }
        }
        *self.state.lock().unwrap() = DriverState::Closed;
        info!(driver = %self.shared.name, "Driver closed");

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn tasks_to_csv(&self) -> String {
        tasks_to_csv(&self.shared.tasks)
    }

    pub fn tasks_to_stats_string(&self) -> String {
        tasks_to_stats_string(&self.shared.tasks)
    }
}

impl Drop for ConcurrencyBoundedDriver {
    fn drop(&mut self) {
        self.shared.stop_flag.store(true, Ordering::Release);
        if let Ok(mut logger) = self.stats_logger.lock() {
            if let Some(handle) = logger.take() {
                handle.abort();
            }
        }
    }
}

impl fmt::Debug for ConcurrencyBoundedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyBoundedDriver")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .field("tasks", &self.shared.tasks.len())
            .field("in_flight", &self.in_flight())
            .field("dispatched", &self.dispatched())
            .finish()
    }
}

/// Rotate over the tasks until stopped; returns the in-flight set
async fn dispatch_loop(shared: Arc<Shared>) -> JoinSet<()> {
    let mut in_flight = JoinSet::new();
    let mut next = 0usize;

    while !shared.stop_flag.load(Ordering::Acquire) {
        while let Some(joined) = in_flight.try_join_next() {
            log_join_result(&shared.name, joined);
        }

        if !shared.try_admit() {
            tokio::time::sleep(shared.settings.backoff).await;
            continue;
        }

        let task = shared.tasks[next].clone();
        next = (next + 1) % shared.tasks.len();
        shared.dispatched.fetch_add(1, Ordering::Relaxed);

        let guard = InFlightGuard(shared.clone());
        let driver = shared.name.clone();
        in_flight.spawn(async move {
            let _guard = guard;
            if let Err(e) = task.run().await {
                debug!(driver = %driver, task = task.name(), error = %e, "Sample dropped");
            }
        });

        // Let freshly spawned work start on a single-threaded runtime
        tokio::task::yield_now().await;
    }

    in_flight
}

/// Log `STATS => ...` for all tasks every `stats_log_interval`
async fn stats_log_loop(shared: Arc<Shared>) {
    let period = shared.settings.stats_log_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if shared.stop_flag.load(Ordering::Acquire) {
            break;
        }
        info!(driver = %shared.name, "STATS => {}", tasks_to_stats_string(&shared.tasks));
    }
}

fn log_join_result(driver: &str, joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(driver = %driver, error = %e, "Invocation panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::WindowConfig;
    use crate::store::{StoreError, StoreResult};
    use crate::worker::Operation;
    use async_trait::async_trait;

    struct SleepOp {
        name: String,
        latency: Duration,
        fail: bool,
    }

    #[async_trait]
    impl Operation for SleepOp {
        fn name(&self) -> &str {
            &self.name
        }

        async fn invoke(&self) -> StoreResult<()> {
            tokio::time::sleep(self.latency).await;
            if self.fail {
                Err(StoreError::Unavailable {
                    message: "down".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn sleep_tasks(count: usize, latency: Duration, fail: bool) -> Vec<Arc<TimedTask>> {
        (0..count)
            .map(|i| {
                let op = SleepOp {
                    name: format!("op{}", i),
                    latency,
                    fail,
                };
                Arc::new(TimedTask::new(
                    Box::new(op),
                    WindowConfig::new(Duration::from_secs(1), 10),
                ))
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_and_full_accounting() {
        let tasks = sleep_tasks(5, Duration::from_millis(50), false);
        let driver = ConcurrencyBoundedDriver::new("test", tasks, DriverSettings::new(2));

        driver.start().unwrap();
        assert_eq!(driver.state(), DriverState::Running);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let csv = driver.drain_and_get_stats().await.unwrap();
        assert_eq!(driver.state(), DriverState::Draining);
        assert_eq!(driver.in_flight(), 0);
        assert!(driver.peak_in_flight() <= 2);
        // 2 slots for 4 rounds of 50ms, plus the pair that may be admitted at
        // the 200ms boundary before the stop flag is seen
        assert!(driver.dispatched() >= 6);
        assert!(driver.dispatched() <= 2 * (200 / 50) + 2, "over-admitted: {}", driver.dispatched());

        let recorded: u64 = driver.tasks().iter().map(|t| t.snapshot().n).sum();
        assert_eq!(recorded, driver.dispatched());
        assert!(recorded <= 10);

        let fields: Vec<&str> = csv.split(',').collect();
        assert_eq!(fields.len(), 5 * 5);

        driver.close().await.unwrap();
        assert_eq!(driver.state(), DriverState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_robin_covers_every_task() {
        let tasks = sleep_tasks(3, Duration::from_millis(10), false);
        let driver = ConcurrencyBoundedDriver::new("rr", tasks, DriverSettings::new(3));

        driver.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        driver.drain_and_get_stats().await.unwrap();

        for task in driver.tasks() {
            assert!(task.invocations() > 0, "{} never ran", task);
        }
        driver.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_counted_and_timed() {
        let tasks = sleep_tasks(1, Duration::from_millis(5), true);
        let driver = ConcurrencyBoundedDriver::new("failing", tasks, DriverSettings::new(4));

        driver.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.drain_and_get_stats().await.unwrap();

        let task = &driver.tasks()[0];
        assert!(task.failures() > 0);
        assert_eq!(task.failures(), task.invocations());
        assert_eq!(task.snapshot().n, task.invocations());
        assert!(driver.tasks_to_stats_string().contains("FAILED]"));
        driver.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_cancels_in_flight() {
        let tasks = sleep_tasks(1, Duration::from_secs(10), false);
        let settings = DriverSettings::new(3).with_drain_timeout(Duration::from_millis(100));
        let driver = ConcurrencyBoundedDriver::new("slow", tasks, settings);

        driver.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(driver.in_flight(), 3);

        let started = Instant::now();
        let report = driver.drain().await.unwrap();
        assert!(report.timed_out());
        assert_eq!(report.cancelled, 3);
        assert_eq!(driver.last_drain(), report);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(driver.in_flight(), 0);

        driver.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_errors() {
        let driver = ConcurrencyBoundedDriver::new("empty", Vec::new(), DriverSettings::new(1));
        assert!(driver.start().is_err());

        let tasks = sleep_tasks(1, Duration::from_millis(1), false);
        let driver = ConcurrencyBoundedDriver::new("twice", tasks, DriverSettings::new(1));
        driver.start().unwrap();
        assert!(driver.start().is_err());

        driver.drain().await.unwrap();
        assert_eq!(driver.drain().await.unwrap(), DrainReport::default());
        assert!(driver.start().is_err());
        driver.close().await.unwrap();
        driver.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_minimum_population_requires_every_task() {
        let tasks = sleep_tasks(2, Duration::from_millis(20), false);
        let driver = ConcurrencyBoundedDriver::new("minpop", tasks, DriverSettings::new(2));
        assert!(!driver.reached_minimum_stats_population());

        driver.start().unwrap();
        // Window is 1s and refreshes every 1s: by 2.5s both have filled and refreshed
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(driver.reached_minimum_stats_population());
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_tasks_to_csv_joins_with_commas() {
        let tasks = sleep_tasks(2, Duration::from_millis(1), false);
        assert_eq!(tasks_to_csv(&tasks), "0,,,,,0,,,,");
        assert_eq!(
            tasks_to_stats_string(&tasks).matches("; ").count(),
            1
        );
    }
}
