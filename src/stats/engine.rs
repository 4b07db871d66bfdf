//! Concurrent statistics engine
//!
//! `StatisticsEngine` wraps one `SlidingWindow` in a single-writer actor:
//!
//! ```text
//! producers --submit()--> bounded mpsc --> consumer task --> SlidingWindow
//!                                              |
//!                          refresh ticker -----+
//!                                              v
//!                                    watch<WindowStats> --> readers
//! ```
//!
//! - **Backpressure**: `submit` waits for queue capacity; samples are never
//!   dropped
//! - **Engine clock**: each sample is stamped at submission with the time
//!   since the engine was created (`tokio::time::Instant`, so tests can pause
//!   and advance it)
//! - **Serialization**: bucket mutation and refresh both run on the consumer
//!   task; nothing else touches the window
//! - **Snapshots**: readers clone the latest published `WindowStats` and never
//!   wait on the consumer
//!
//! # Example
//!
//! ```no_run
//! use kvpulse::stats::{StatisticsEngine, WindowConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), kvpulse::stats::StatsError> {
//! let engine = StatisticsEngine::new("set", WindowConfig::new(Duration::from_secs(30), 20));
//!
//! engine.submit(1.25).await?;
//! let stats = engine.refresh().await?;
//! println!("{}", stats.to_stats_string());
//!
//! engine.close().await?;
//! # Ok(())
//! # }
//! ```

use super::snapshot::WindowStats;
use super::window::{SlidingWindow, WindowConfig};
use super::StatsError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, trace};

/// Messages drained by the consumer per wakeup
const CONSUMER_BATCH: usize = 256;

/// Reordering between neighbouring producers beyond this is logged
const MAX_EXPECTED_SKEW: Duration = Duration::from_millis(1);

enum Message {
    Sample { at: Duration, value: f64 },
    Sync(oneshot::Sender<()>),
    Refresh(oneshot::Sender<WindowStats>),
    Reset(oneshot::Sender<()>),
}

/// Sliding-window statistics fed concurrently through a bounded queue
///
/// Must be created inside a tokio runtime: the constructor spawns the
/// consumer task.
pub struct StatisticsEngine {
    name: Arc<str>,
    config: WindowConfig,
    origin: Instant,
    runtime: Handle,
    tx: mpsc::Sender<Message>,
    snapshot: watch::Receiver<WindowStats>,
    shutdown: watch::Sender<bool>,
    consumer: Mutex<Option<JoinHandle<Result<(), StatsError>>>>,
}

impl StatisticsEngine {
    /// Create an engine and start its consumer
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, or if `config` has zero
    /// buckets or a zero queue capacity.
    pub fn new(name: impl Into<String>, config: WindowConfig) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let window = SlidingWindow::new(config);

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (snapshot_tx, snapshot) = watch::channel(WindowStats::default());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let origin = Instant::now();

        let consumer = Consumer {
            name: name.clone(),
            window,
            origin,
            rx,
            snapshot_tx,
            shutdown_rx,
            refresh_interval: config.refresh_interval,
        };
        let handle = tokio::spawn(consumer.run());

        debug!(
            engine = %name,
            window = ?config.window,
            buckets = config.num_buckets,
            refresh = ?config.refresh_interval,
            "Statistics engine started"
        );

        Self {
            name,
            config,
            origin,
            runtime: Handle::current(),
            tx,
            snapshot,
            shutdown,
            consumer: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Submit one sample, waiting for queue capacity if needed
    ///
    /// The sample is stamped after capacity is secured, so time spent waiting
    /// does not age it.
    ///
    /// # Errors
    ///
    /// `StatsError::EngineClosed` once the engine has been closed.
    pub async fn submit(&self, value: f64) -> Result<(), StatsError> {
        let permit = self.tx.reserve().await.map_err(|_| StatsError::EngineClosed)?;
        permit.send(Message::Sample {
            at: self.origin.elapsed(),
            value,
        });
        Ok(())
    }

    /// Blocking variant of [`submit`](Self::submit) for synchronous callers
    ///
    /// Stamps after capacity is secured, like `submit`.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    pub fn submit_blocking(&self, value: f64) -> Result<(), StatsError> {
        self.runtime.block_on(self.submit(value))
    }

    /// Wait until every sample submitted so far has been applied
    pub async fn sync(&self) -> Result<WindowStats, StatsError> {
        let (reply, done) = oneshot::channel();
        self.send(Message::Sync(reply)).await?;
        done.await.map_err(|_| StatsError::EngineClosed)?;
        Ok(self.snapshot())
    }

    /// Refresh now (trim and recompute slow state) and return the result
    ///
    /// Samples submitted before this call are applied first.
    pub async fn refresh(&self) -> Result<WindowStats, StatsError> {
        let (reply, done) = oneshot::channel();
        self.send(Message::Refresh(reply)).await?;
        done.await.map_err(|_| StatsError::EngineClosed)
    }

    /// Discard all collected statistics
    pub async fn reset(&self) -> Result<(), StatsError> {
        let (reply, done) = oneshot::channel();
        self.send(Message::Reset(reply)).await?;
        done.await.map_err(|_| StatsError::EngineClosed)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> WindowStats {
        self.snapshot.borrow().clone()
    }

    pub fn to_stats_string(&self) -> String {
        self.snapshot().to_stats_string()
    }

    pub fn to_csv(&self) -> String {
        self.snapshot().to_csv()
    }

    pub fn has_updated_after_window_filled(&self) -> bool {
        self.snapshot.borrow().has_updated_after_window_filled
    }

    pub fn is_window_full(&self) -> bool {
        self.snapshot.borrow().window_full_fraction >= 1.0
    }

    pub fn window_full_fraction(&self) -> f64 {
        self.snapshot.borrow().window_full_fraction
    }

    /// Stop the consumer and refresh timer and close the queue
    ///
    /// Producers waiting on a full queue, and any later `submit`, observe
    /// `StatsError::EngineClosed`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the contract error that stopped the consumer, if one did.
    pub async fn close(&self) -> Result<(), StatsError> {
        let handle = match self.consumer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        self.shutdown.send_replace(true);
        let result = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        };

        debug!(engine = %self.name, "Statistics engine closed");
        result
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn send(&self, message: Message) -> Result<(), StatsError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| StatsError::EngineClosed)
    }
}

impl Drop for StatisticsEngine {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl std::fmt::Debug for StatisticsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsEngine")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// State owned by the consumer task
struct Consumer {
    name: Arc<str>,
    window: SlidingWindow,
    origin: Instant,
    rx: mpsc::Receiver<Message>,
    snapshot_tx: watch::Sender<WindowStats>,
    shutdown_rx: watch::Receiver<bool>,
    refresh_interval: Duration,
}

impl Consumer {
    async fn run(mut self) -> Result<(), StatsError> {
        let mut ticker = interval_at(Instant::now() + self.refresh_interval, self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut batch = Vec::with_capacity(CONSUMER_BATCH);

        let result = loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => break Ok(()),

                // Ahead of the queue so a saturated queue cannot starve it
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh() {
                        break Err(e);
                    }
                }

                received = self.rx.recv_many(&mut batch, CONSUMER_BATCH) => {
                    if received == 0 {
                        break Ok(());
                    }
                    if let Err(e) = self.apply(&mut batch) {
                        break Err(e);
                    }
                }
            }
        };

        // Refuse anything still queued
        self.rx.close();

        if let Err(e) = &result {
            error!(engine = %self.name, error = %e, "Statistics engine consumer failed");
        }
        result
    }

    fn apply(&mut self, batch: &mut Vec<Message>) -> Result<(), StatsError> {
        for message in batch.drain(..) {
            match message {
                Message::Sample { at, value } => {
                    let (at, skew) = order_timestamp(self.window.newest_sample_time(), at);
                    if skew > MAX_EXPECTED_SKEW {
                        debug!(
                            engine = %self.name,
                            skew = ?skew,
                            "Sample stamped behind the newest one, clamped"
                        );
                    }
                    self.window.add(at, value)?;
                }
                Message::Sync(reply) => {
                    self.publish();
                    let _ = reply.send(());
                }
                Message::Refresh(reply) => {
                    self.refresh()?;
                    let _ = reply.send(self.snapshot_tx.borrow().clone());
                }
                Message::Reset(reply) => {
                    self.window.reset();
                    self.publish();
                    let _ = reply.send(());
                }
            }
        }
        self.publish();
        Ok(())
    }

    fn refresh(&mut self) -> Result<(), StatsError> {
        self.window.refresh(self.origin.elapsed())?;
        let stats = self.window.stats();
        trace!(
            engine = %self.name,
            n = stats.n,
            cost = ?stats.refresh_cost,
            "Refreshed window"
        );
        self.snapshot_tx.send_replace(stats);
        Ok(())
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.window.stats());
    }
}

/// Clamp a sample time to the newest one already applied
///
/// Two producers can stamp in one order and enqueue in the other. Returns
/// the time to apply and how far it was moved forward.
fn order_timestamp(newest: Option<Duration>, at: Duration) -> (Duration, Duration) {
    match newest {
        Some(newest) if newest > at => (newest, newest - at),
        _ => (at, Duration::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn engine(window_ms: u64, buckets: usize) -> StatisticsEngine {
        StatisticsEngine::new("test", WindowConfig::new(ms(window_ms), buckets))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_scenario() {
        let engine = engine(1000, 10);

        for _ in 0..10 {
            engine.submit(5.0).await.unwrap();
            sleep(ms(100)).await;
        }
        // t = 1000ms; one more step to 1050ms
        sleep(ms(50)).await;
        engine.submit(10.0).await.unwrap();

        let stats = engine.refresh().await.unwrap();
        assert_eq!(stats.n, 10);
        assert_eq!(stats.mean, Some((9.0 * 5.0 + 10.0) / 10.0));
        assert!(stats.has_updated_after_window_filled);
        assert!(engine.is_window_full());

        engine.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_before_fill_reports_fast_state_only() {
        let engine = engine(1000, 10);
        engine.submit(2.0).await.unwrap();
        engine.submit(4.0).await.unwrap();

        let stats = engine.sync().await.unwrap();
        assert_eq!(stats.n, 2);
        assert_eq!(stats.mean, Some(3.0));
        assert!(!engine.has_updated_after_window_filled());
        assert_eq!(engine.to_csv(), "2,3.000,,,");
        assert!(engine.to_stats_string().contains("MP=10%"));

        engine.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_window_drains_on_periodic_refresh() {
        let engine = engine(1000, 10);
        for _ in 0..5 {
            engine.submit(1.0).await.unwrap();
            sleep(ms(10)).await;
        }
        engine.sync().await.unwrap();
        assert_eq!(engine.snapshot().n, 5);

        // Several refresh periods with no traffic
        sleep(ms(3500)).await;
        engine.sync().await.unwrap();

        let stats = engine.snapshot();
        assert_eq!(stats.n, 0);
        assert_eq!(stats.to_csv(), "0,,,,");

        engine.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_csv_is_idempotent_without_submissions() {
        let engine = engine(1000, 10);
        for i in 0..20 {
            engine.submit(i as f64).await.unwrap();
            sleep(ms(60)).await;
        }
        engine.refresh().await.unwrap();

        let first = engine.to_csv();
        let second = engine.to_csv();
        assert_eq!(first, second);

        engine.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_producers_all_counted() {
        let engine = Arc::new(StatisticsEngine::new(
            "concurrent",
            WindowConfig::new(ms(10_000), 20).with_queue_capacity(4),
        ));

        let mut handles = Vec::new();
        for p in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    engine.submit((p * 50 + i) as f64).await.unwrap();
                    if i % 10 == 0 {
                        sleep(ms(1)).await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = engine.sync().await.unwrap();
        assert_eq!(stats.n, 400);
        assert_eq!(stats.total, (0..400).sum::<u64>() as f64);

        engine.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_statistics() {
        let engine = engine(1000, 10);
        for _ in 0..12 {
            engine.submit(3.0).await.unwrap();
            sleep(ms(100)).await;
        }
        engine.refresh().await.unwrap();
        assert!(engine.has_updated_after_window_filled());

        engine.reset().await.unwrap();

        assert_eq!(engine.snapshot(), WindowStats::default());
        engine.submit(1.0).await.unwrap();
        assert_eq!(engine.sync().await.unwrap().n, 1);

        engine.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_close_fails() {
        let engine = engine(1000, 10);
        engine.submit(1.0).await.unwrap();
        engine.close().await.unwrap();

        assert!(engine.is_closed());
        assert!(matches!(engine.submit(1.0).await, Err(StatsError::EngineClosed)));
        assert!(matches!(engine.refresh().await, Err(StatsError::EngineClosed)));

        // Second close is a no-op
        engine.close().await.unwrap();
    }

    #[test]
    fn test_order_timestamp() {
        let ms = Duration::from_millis;
        assert_eq!(order_timestamp(None, ms(5)), (ms(5), Duration::ZERO));
        assert_eq!(order_timestamp(Some(ms(4)), ms(5)), (ms(5), Duration::ZERO));
        assert_eq!(order_timestamp(Some(ms(5)), ms(5)), (ms(5), Duration::ZERO));
        assert_eq!(order_timestamp(Some(ms(9)), ms(5)), (ms(9), ms(4)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_blocking_waits_for_capacity() {
        let config = WindowConfig::new(Duration::from_secs(60), 10).with_queue_capacity(1);
        let engine = Arc::new(StatisticsEngine::new("blocking", config));

        let producer = engine.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..200 {
                producer.submit_blocking(1.0).unwrap();
            }
        })
        .await
        .unwrap();

        let stats = engine.sync().await.unwrap();
        assert_eq!(stats.n, 200);
        assert_eq!(stats.mean, Some(1.0));

        engine.close().await.unwrap();
        let producer = engine.clone();
        let closed = tokio::task::spawn_blocking(move || producer.submit_blocking(1.0))
            .await
            .unwrap();
        assert!(matches!(closed, Err(StatsError::EngineClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_blocking_from_sync_context() {
        let engine = Arc::new(engine(1000, 10));

        let producer = engine.clone();
        tokio::task::spawn_blocking(move || {
            for _ in 0..3 {
                producer.submit_blocking(2.0).unwrap();
            }
        })
        .await
        .unwrap();

        let stats = engine.sync().await.unwrap();
        assert_eq!(stats.n, 3);
        assert_eq!(stats.total, 6.0);

        engine.close().await.unwrap();
    }
}
