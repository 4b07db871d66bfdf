//! Time buckets
//!
//! A `TimeBucket` accumulates the samples whose timestamp falls inside one
//! slice of the sliding window. It keeps the samples themselves (in arrival
//! order, which is also timestamp order) plus running count/total/min/max so
//! the owning window can combine buckets without rescanning samples.
//!
//! Timestamps are offsets from the owning engine's clock origin.
//!
//! # Span accounting
//!
//! Each bucket reports how much of the observed window it covers:
//!
//! ```text
//! span = upper - retained_from
//!
//! upper         = end                       (finalized)
//!               = newest sample, or start   (still receiving)
//! retained_from = start, advanced by trimming
//! ```
//!
//! Because buckets are contiguous, the window span is the sum of bucket
//! spans, and every mutation (`add`, `finalize`, `trim_older_than`) reports
//! its exact delta so the owner can keep the total in O(1).

use super::StatsError;
use std::collections::VecDeque;
use std::time::Duration;

/// One timed latency sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Offset from the engine clock origin
    pub at: Duration,
    /// Latency value (milliseconds in this crate)
    pub value: f64,
}

/// What a trim removed from a bucket
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Trimmed {
    pub count: u64,
    pub total: f64,
    pub span: Duration,
}

/// Accumulator for one `[start, end)` slice of the window
#[derive(Debug, Clone)]
pub struct TimeBucket {
    start: Duration,
    end: Duration,
    samples: VecDeque<Sample>,
    total: f64,
    min: Option<f64>,
    max: Option<f64>,
    newest: Option<Duration>,
    retained_from: Duration,
    finalized: bool,
}

impl TimeBucket {
    /// Create an empty bucket covering `[start, end)`
    pub fn new(start: Duration, end: Duration) -> Self {
        debug_assert!(end > start, "bucket must have a positive duration");
        Self {
            start,
            end,
            samples: VecDeque::new(),
            total: 0.0,
            min: None,
            max: None,
            newest: None,
            retained_from: start,
            finalized: false,
        }
    }

    /// Append a sample
    ///
    /// Returns the growth of the bucket's observed span.
    ///
    /// # Errors
    ///
    /// - `StatsError::Finalized` once the bucket has been finalized
    /// - `StatsError::Range` if `at` is outside `[start, end]`
    /// - `StatsError::OutOfOrder` if `at` is older than the newest sample
    pub fn add(&mut self, at: Duration, value: f64) -> Result<Duration, StatsError> {
        if self.finalized {
            return Err(StatsError::Finalized {
                start: self.start,
                end: self.end,
            });
        }
        if at < self.start || at > self.end {
            return Err(StatsError::Range {
                at,
                start: self.start,
                end: self.end,
            });
        }
        if let Some(newest) = self.newest {
            if at < newest {
                return Err(StatsError::OutOfOrder { at, newest });
            }
        }

        let before = self.upper();

        self.samples.push_back(Sample { at, value });
        self.total += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.newest = Some(at);

        Ok(self.upper() - before)
    }

    /// Mark the bucket as closed for inserts
    ///
    /// Returns the span growth: a finalized bucket covers its full interval.
    pub fn finalize(&mut self) -> Duration {
        if self.finalized {
            return Duration::ZERO;
        }
        let before = self.upper();
        self.finalized = true;
        self.upper() - before
    }

    /// Remove every sample with `at < cutoff`
    ///
    /// Min and max are recomputed from the remaining samples.
    pub fn trim_older_than(&mut self, cutoff: Duration) -> Trimmed {
        let mut trimmed = Trimmed::default();

        while let Some(front) = self.samples.front() {
            if front.at >= cutoff {
                break;
            }
            trimmed.count += 1;
            trimmed.total += front.value;
            self.samples.pop_front();
        }

        if trimmed.count > 0 {
            if self.samples.is_empty() {
                self.total = 0.0;
                self.min = None;
                self.max = None;
            } else {
                self.total -= trimmed.total;
                self.recompute_min_max();
            }
        }

        let new_from = cutoff.min(self.upper()).max(self.retained_from);
        trimmed.span = new_from - self.retained_from;
        self.retained_from = new_from;

        trimmed
    }

    /// Σ(value − mean)² over the retained samples
    pub fn sum_of_squared_deviations(&self, mean: f64) -> f64 {
        self.samples
            .iter()
            .map(|s| {
                let d = s.value - mean;
                d * d
            })
            .sum()
    }

    fn recompute_min_max(&mut self) {
        let mut values = self.samples.iter().map(|s| s.value);
        let first = values.next();
        let (min, max) = values.fold((first, first), |(lo, hi), v| {
            (lo.map(|l| l.min(v)), hi.map(|h| h.max(v)))
        });
        self.min = min;
        self.max = max;
    }

    fn upper(&self) -> Duration {
        if self.finalized {
            self.end
        } else {
            self.newest.unwrap_or(self.start)
        }
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn end(&self) -> Duration {
        self.end
    }

    pub fn count(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Smallest retained value, `None` when empty
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Largest retained value, `None` when empty
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn oldest_sample_time(&self) -> Option<Duration> {
        self.samples.front().map(|s| s.at)
    }

    /// Newest timestamp ever inserted (survives trimming)
    pub fn newest_sample_time(&self) -> Option<Duration> {
        self.newest
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Portion of the window this bucket currently accounts for
    pub fn span(&self) -> Duration {
        self.upper() - self.retained_from
    }

    /// Left edge of the retained part of the bucket
    pub fn retained_from(&self) -> Duration {
        self.retained_from
    }
}
