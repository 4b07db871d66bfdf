//! Bucketed sliding window
//!
//! `SlidingWindow` is the single-threaded core of the statistics engine. It
//! holds a ring of contiguous `TimeBucket`s covering the trailing window and
//! maintains two tiers of state:
//!
//! - **Fast state** (`n`, `total`, `mean`, window span): updated in O(1) on
//!   every sample and on every bucket eviction
//! - **Slow state** (stddev, min, max): recomputed by `refresh`, which also
//!   trims samples that have aged out of the window
//!
//! # Bucket lifecycle
//!
//! ```text
//! add(at) with at >= tail.end:
//!   finalize tail -> open [tail.end, tail.end + bucket) -> repeat
//!   (opening a bucket on a full ring evicts the head)
//!
//! refresh(now), cutoff = now - window:
//!   dequeue finalized head buckets with end <= cutoff
//!   trim head samples older than cutoff
//!   recompute slow state
//! ```
//!
//! Timestamps are offsets from the engine clock origin and must not go
//! backwards. A gap of a full window or more since the newest bucket restarts
//! the ring at the new sample.

use super::bucket::TimeBucket;
use super::ring_buffer::RingBuffer;
use super::snapshot::{SlowStats, WindowStats};
use super::StatsError;
use std::time::Duration;
use tracing::trace;

/// Sliding window parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Target trailing window
    pub window: Duration,
    /// Buckets the window is divided into (also the ring capacity)
    pub num_buckets: usize,
    /// How often the engine refreshes slow state
    pub refresh_interval: Duration,
    /// Ingestion queue depth before producers wait
    pub queue_capacity: usize,
}

impl WindowConfig {
    pub const DEFAULT_NUM_BUCKETS: usize = 20;
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    /// Window split into `num_buckets`, refreshed once per window
    pub fn new(window: Duration, num_buckets: usize) -> Self {
        Self {
            window,
            num_buckets,
            refresh_interval: window,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// `window / num_buckets`
    pub fn bucket_duration(&self) -> Duration {
        self.window / self.num_buckets.max(1) as u32
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Self::DEFAULT_NUM_BUCKETS)
    }
}

/// Ring of time buckets with O(1) fast state
#[derive(Debug)]
pub struct SlidingWindow {
    config: WindowConfig,
    bucket_duration: Duration,
    buckets: RingBuffer<TimeBucket>,

    // Fast state
    n: u64,
    total: f64,
    span: Duration,

    // Slow state
    slow: Option<SlowStats>,
    filled_once: bool,
    has_updated_after_window_filled: bool,
    refresh_cost: Duration,
}

impl SlidingWindow {
    /// Create an empty window
    ///
    /// # Panics
    ///
    /// Panics if `num_buckets` is zero or the bucket duration rounds to zero.
    pub fn new(config: WindowConfig) -> Self {
        let bucket_duration = config.bucket_duration();
        assert!(
            config.num_buckets > 0 && !bucket_duration.is_zero(),
            "window must have at least one non-empty bucket"
        );

        let buckets = RingBuffer::with_eviction(config.num_buckets).on_evict(|bucket: &TimeBucket| {
            trace!(
                start = ?bucket.start(),
                end = ?bucket.end(),
                count = bucket.count(),
                "Evicting bucket"
            );
        });

        Self {
            config,
            bucket_duration,
            buckets,
            n: 0,
            total: 0.0,
            span: Duration::ZERO,
            slow: None,
            filled_once: false,
            has_updated_after_window_filled: false,
            refresh_cost: Duration::ZERO,
        }
    }

    /// Record one sample
    ///
    /// # Errors
    ///
    /// `StatsError::Range` / `StatsError::OutOfOrder` if `at` is older than
    /// data already in the window. These are caller bugs.
    pub fn add(&mut self, at: Duration, value: f64) -> Result<(), StatsError> {
        if self.needs_restart(at) {
            self.restart(at)?;
        }

        loop {
            let tail = self.buckets.peek_tail_mut()?;
            if at < tail.end() {
                break;
            }
            self.span += tail.finalize();
            let next_start = tail.end();
            self.open_bucket(next_start)?;
        }

        let tail = self.buckets.peek_tail_mut()?;
        self.span += tail.add(at, value)?;
        self.n += 1;
        self.total += value;

        Ok(())
    }

    /// Trim data older than `now - window` and recompute slow state
    pub fn refresh(&mut self, now: Duration) -> Result<(), StatsError> {
        let started = std::time::Instant::now();
        let cutoff = now.saturating_sub(self.config.window);

        if !self.buckets.is_empty() {
            while self.buckets.len() > 1 {
                let head = self.buckets.peek_head()?;
                if !head.is_finalized() || head.end() > cutoff {
                    break;
                }
                let expired = self.buckets.dequeue()?;
                self.roll_out(&expired);
            }

            let trimmed = self.buckets.peek_head_mut()?.trim_older_than(cutoff);
            self.n -= trimmed.count;
            self.total -= trimmed.total;
            self.span -= trimmed.span;

            if trimmed.count > 0 {
                trace!(count = trimmed.count, cutoff = ?cutoff, "Trimmed expired samples");
            }
        }

        // Count is exact; total is resynced so float error cannot accumulate
        debug_assert_eq!(
            self.buckets.iter().map(|b| b.count()).sum::<u64>(),
            self.n,
            "fast count drifted from bucket contents"
        );
        self.total = self.buckets.iter().map(|b| b.total()).sum();

        self.slow = self.compute_slow();
        if self.filled_once {
            self.has_updated_after_window_filled = true;
        }
        self.refresh_cost = started.elapsed();

        Ok(())
    }

    /// Discard all buckets and state, as if newly created
    pub fn reset(&mut self) {
        self.clear_data();
        self.filled_once = false;
        self.has_updated_after_window_filled = false;
        self.refresh_cost = Duration::ZERO;
    }

    /// Current snapshot
    pub fn stats(&self) -> WindowStats {
        WindowStats {
            n: self.n,
            total: self.total,
            mean: self.mean(),
            window_span: self.span,
            window_full_fraction: self.window_full_fraction(),
            slow: self.slow,
            has_updated_after_window_filled: self.has_updated_after_window_filled,
            refresh_cost: self.refresh_cost,
        }
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    /// `total / n`, `None` when empty
    pub fn mean(&self) -> Option<f64> {
        if self.n == 0 {
            None
        } else {
            Some(self.total / self.n as f64)
        }
    }

    /// Observed span of the retained data
    pub fn window_span(&self) -> Duration {
        self.span
    }

    pub fn is_window_full(&self) -> bool {
        self.buckets.len() >= self.config.num_buckets
    }

    pub fn window_full_fraction(&self) -> f64 {
        self.buckets.len() as f64 / self.config.num_buckets as f64
    }

    pub fn has_updated_after_window_filled(&self) -> bool {
        self.has_updated_after_window_filled
    }

    /// Newest timestamp in the window, if any
    pub fn newest_sample_time(&self) -> Option<Duration> {
        self.buckets
            .peek_tail()
            .ok()
            .and_then(|tail| tail.newest_sample_time())
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Buckets from oldest to newest
    pub fn buckets(&self) -> impl Iterator<Item = &TimeBucket> {
        self.buckets.iter()
    }

    fn needs_restart(&self, at: Duration) -> bool {
        match self.buckets.peek_tail() {
            Ok(tail) => at >= tail.end() + self.config.window,
            Err(_) => true,
        }
    }

    /// Drop everything and open a fresh bucket at `at`
    fn restart(&mut self, at: Duration) -> Result<(), StatsError> {
        if !self.buckets.is_empty() {
            trace!(at = ?at, "Window idle for longer than its span, restarting");
        }
        self.clear_data();
        self.open_bucket(at)
    }

    fn clear_data(&mut self) {
        self.buckets.clear();
        self.n = 0;
        self.total = 0.0;
        self.span = Duration::ZERO;
        self.slow = None;
    }

    fn open_bucket(&mut self, start: Duration) -> Result<(), StatsError> {
        let bucket = TimeBucket::new(start, start + self.bucket_duration);
        if let Some(evicted) = self.buckets.enqueue(bucket)? {
            self.roll_out(&evicted);
        }
        if self.buckets.is_full() {
            self.filled_once = true;
        }
        Ok(())
    }

    fn roll_out(&mut self, bucket: &TimeBucket) {
        self.n -= bucket.count();
        self.total -= bucket.total();
        self.span -= bucket.span();
    }

    fn compute_slow(&self) -> Option<SlowStats> {
        let mean = self.mean()?;
        let n = self.n as f64;

        let squared: f64 = self
            .buckets
            .iter()
            .map(|b| b.sum_of_squared_deviations(mean))
            .sum();
        let min = self
            .buckets
            .iter()
            .filter_map(|b| b.min())
            .fold(f64::INFINITY, f64::min);
        let max = self
            .buckets
            .iter()
            .filter_map(|b| b.max())
            .fold(f64::NEG_INFINITY, f64::max);

        Some(SlowStats {
            stddev: (squared / n).sqrt(),
            min,
            max,
        })
    }
}
