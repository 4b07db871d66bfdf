//! Timed store operations
//!
//! A [`TimedTask`] pairs one [`Operation`] with its own [`StatisticsEngine`].
//! The driver calls [`TimedTask::run`] concurrently from many in-flight
//! tasks; each call times one invocation and submits the latency in
//! milliseconds. Failed invocations are counted and logged, and their latency
//! is recorded like any other sample.
//!
//! # Example
//!
//! ```no_run
//! use kvpulse::stats::WindowConfig;
//! use kvpulse::store::{KvStore, MemoryStore};
//! use kvpulse::worker::{ops::IsEmptyOp, TimedTask};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), kvpulse::stats::StatsError> {
//! let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
//! let task = TimedTask::new(
//!     Box::new(IsEmptyOp::new(store)),
//!     WindowConfig::new(Duration::from_secs(30), 20),
//! );
//!
//! task.run().await?;
//! println!("{}", task.to_stats_string());
//! task.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod ops;

pub use ops::{build_operation, KeyBoundary, Operation};

use crate::stats::{MovingAverage, StatisticsEngine, StatsError, WindowConfig, WindowStats};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One operation plus its sliding-window latency statistics
pub struct TimedTask {
    operation: Box<dyn Operation>,
    engine: StatisticsEngine,
    moving_average: Mutex<MovingAverage>,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl TimedTask {
    /// Must be called inside a tokio runtime (starts the engine consumer)
    pub fn new(operation: Box<dyn Operation>, config: WindowConfig) -> Self {
        let engine = StatisticsEngine::new(operation.name(), config);
        Self {
            operation,
            engine,
            moving_average: Mutex::new(MovingAverage::new()),
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.operation.name()
    }

    /// Invoke the operation once and record its latency
    ///
    /// Operation failures never escape; the only error is a closed engine.
    pub async fn run(&self) -> Result<(), StatsError> {
        let start = Instant::now();
        let result = self.operation.invoke().await;
        let millis = start.elapsed().as_secs_f64() * 1000.0;

        self.invocations.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = result {
            self.failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                error = %e,
                "*** EXCEPTION [{}] *** {}",
                self.operation.name(),
                e.kind()
            );
        }

        if !self.operation.quiet() {
            let outlier = self.moving_average.lock().unwrap().add(millis);
            if let Some(outlier) = outlier {
                warn!(
                    operation = self.operation.name(),
                    latency_ms = outlier.value,
                    mean_ms = outlier.mean,
                    stddev_ms = outlier.stddev,
                    "Latency outlier: {} sigma",
                    outlier.sigmas
                );
            }
        }

        self.engine.submit(millis).await
    }

    /// Invocations since creation, failed ones included
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Failed invocations since creation (not cleared by `clear_stats`)
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Discard collected latency statistics
    pub async fn clear_stats(&self) -> Result<(), StatsError> {
        self.engine.reset().await?;
        self.moving_average.lock().unwrap().clear();
        debug!(operation = self.name(), "Statistics cleared");
        Ok(())
    }

    /// Slow state has been computed over a full window at least once
    pub fn has_reached_minimum_population(&self) -> bool {
        self.engine.has_updated_after_window_filled()
    }

    /// `name()->{stats}` with a `[N FAILED]` suffix once anything failed
    pub fn to_stats_string(&self) -> String {
        let failures = self.failures();
        let failed = if failures > 0 {
            format!("[{} FAILED]", failures)
        } else {
            String::new()
        };
        format!("{}->{{{}}}{}", self, self.engine.to_stats_string(), failed)
    }

    pub fn to_csv(&self) -> String {
        self.engine.to_csv()
    }

    pub fn snapshot(&self) -> WindowStats {
        self.engine.snapshot()
    }

    /// Force a refresh and return the resulting statistics
    pub async fn refresh(&self) -> Result<WindowStats, StatsError> {
        self.engine.refresh().await
    }

    pub fn engine(&self) -> &StatisticsEngine {
        &self.engine
    }

    pub async fn close(&self) -> Result<(), StatsError> {
        self.engine.close().await
    }
}

impl fmt::Display for TimedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}()", self.operation.name())
    }
}

impl fmt::Debug for TimedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedTask")
            .field("operation", &self.operation.name())
            .field("invocations", &self.invocations())
            .field("failures", &self.failures())
            .finish()
    }
}
