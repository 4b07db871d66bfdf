//! Published statistics snapshots
//!
//! `WindowStats` is the immutable record the engine consumer publishes after
//! every batch and refresh. Readers clone it out of a watch channel, so
//! reporting never waits on the consumer.

use crate::util::time::{calculate_rate, format_count, format_millis, format_rate};
use std::fmt;
use std::time::Duration;

/// Stddev, min and max over the retained samples
///
/// Computed by a refresh, so it may lag the fast state by one refresh period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlowStats {
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

/// Snapshot of one sliding window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowStats {
    /// Samples currently in the window
    pub n: u64,
    pub total: f64,
    /// `total / n`, `None` when the window holds no samples
    pub mean: Option<f64>,
    /// Observed span of the retained data
    pub window_span: Duration,
    /// Fraction of the bucket ring in use, in `[0, 1]`
    pub window_full_fraction: f64,
    /// Result of the latest refresh, `None` before the first one or when empty
    pub slow: Option<SlowStats>,
    /// A refresh has run since the ring first filled up
    pub has_updated_after_window_filled: bool,
    /// Wall time the latest refresh took
    pub refresh_cost: Duration,
}

impl WindowStats {
    /// Samples per second over the observed span
    pub fn rate_per_sec(&self) -> f64 {
        calculate_rate(self.n, self.window_span)
    }

    /// Slow state, only once it covers a full window
    pub fn reportable_slow(&self) -> Option<SlowStats> {
        if self.has_updated_after_window_filled {
            self.slow
        } else {
            None
        }
    }

    /// `n,mean,stddev,min,max`
    ///
    /// Fields with no data are left empty: everything but `n` when the window
    /// is empty, and the slow fields until the window has filled.
    pub fn to_csv(&self) -> String {
        let mean = match self.mean {
            Some(mean) if self.n > 0 => format!("{:.3}", mean),
            _ => String::new(),
        };
        let (stddev, min, max) = match self.reportable_slow() {
            Some(slow) if self.n > 0 => (
                format!("{:.3}", slow.stddev),
                format!("{:.3}", slow.min),
                format!("{:.3}", slow.max),
            ),
            _ => (String::new(), String::new(), String::new()),
        };
        format!("{},{},{},{},{}", self.n, mean, stddev, min, max)
    }

    /// Human-readable summary
    ///
    /// Pre-fill: count, rate, observed window and fill percentage.
    /// Post-fill: count, rate, observed window, mean, stddev and range.
    pub fn to_stats_string(&self) -> String {
        let mut parts = vec![format!("N={}", format_count(self.n))];

        if self.n == 0 {
            return parts.join(" ");
        }

        parts.push(format!("{}/s", format_rate(self.rate_per_sec())));
        parts.push(format!("W={:.1}s", self.window_span.as_secs_f64()));

        match self.reportable_slow() {
            Some(slow) => {
                if let Some(mean) = self.mean {
                    parts.push(format!(
                        "µ={} σ={}",
                        format_millis(mean),
                        format_millis(slow.stddev)
                    ));
                }
                parts.push(format!(
                    "[{}⇠⇢{}]",
                    format_millis(slow.min),
                    format_millis(slow.max)
                ));
            }
            None => {
                parts.push(format!("MP={}%", (self.window_full_fraction * 100.0) as u32));
            }
        }

        parts.join(" ")
    }
}

impl fmt::Display for WindowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_stats_string())
    }
}
