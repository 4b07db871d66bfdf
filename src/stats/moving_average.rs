//! Count-bounded rolling mean for outlier detection
//!
//! `MovingAverage` keeps the last N values in a [`RingBuffer`] in eviction
//! mode, with running sums so mean and stddev are O(1). A TimedTask feeds it
//! every latency and logs values far from the recent mean.

use super::ring_buffer::RingBuffer;

/// A value at least `threshold` standard deviations from the rolling mean
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outlier {
    pub value: f64,
    pub mean: f64,
    pub stddev: f64,
    /// `floor(|value - mean| / stddev)`
    pub sigmas: u64,
}

/// Rolling mean and population stddev over the last `capacity` values
#[derive(Debug)]
pub struct MovingAverage {
    values: RingBuffer<f64>,
    sum: f64,
    sum_of_squares: f64,
    min_population: usize,
    threshold: f64,
}

impl MovingAverage {
    pub const DEFAULT_CAPACITY: usize = 1024;
    pub const DEFAULT_MIN_POPULATION: usize = 64;
    pub const DEFAULT_THRESHOLD_SIGMAS: f64 = 5.0;

    pub fn new() -> Self {
        Self::with_params(
            Self::DEFAULT_CAPACITY,
            Self::DEFAULT_MIN_POPULATION,
            Self::DEFAULT_THRESHOLD_SIGMAS,
        )
    }

    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_params(capacity: usize, min_population: usize, threshold: f64) -> Self {
        Self {
            values: RingBuffer::with_eviction(capacity),
            sum: 0.0,
            sum_of_squares: 0.0,
            min_population: min_population.min(capacity),
            threshold,
        }
    }

    /// Add a value, returning it as an outlier if it is far from the mean
    ///
    /// The value is compared against the population before it is added, and
    /// only once that population has reached the minimum size.
    pub fn add(&mut self, value: f64) -> Option<Outlier> {
        let outlier = self.check(value);

        // Eviction mode never overflows
        if let Ok(evicted) = self.values.enqueue(value) {
            if let Some(old) = evicted {
                self.sum -= old;
                self.sum_of_squares -= old * old;
            }
            self.sum += value;
            self.sum_of_squares += value * value;
        }

        outlier
    }

    fn check(&self, value: f64) -> Option<Outlier> {
        if !self.is_ready() {
            return None;
        }
        let mean = self.mean()?;
        let stddev = self.stddev()?;
        if stddev <= f64::EPSILON {
            return None;
        }

        let sigmas = ((value - mean).abs() / stddev).floor();
        if sigmas >= self.threshold {
            Some(Outlier {
                value,
                mean,
                stddev,
                sigmas: sigmas as u64,
            })
        } else {
            None
        }
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.sum / self.values.len() as f64)
        }
    }

    pub fn stddev(&self) -> Option<f64> {
        let mean = self.mean()?;
        let n = self.values.len() as f64;
        // Running sums can go slightly negative through cancellation
        let variance = (self.sum_of_squares / n - mean * mean).max(0.0);
        Some(variance.sqrt())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Enough values to judge outliers
    pub fn is_ready(&self) -> bool {
        self.values.len() >= self.min_population
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
        self.sum_of_squares = 0.0;
    }
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self::new()
    }
}
