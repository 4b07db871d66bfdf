//! Timing and formatting utilities
//!
//! Stopwatches for periodic work and helpers that render durations, rates and
//! latency values for the human-readable reports.
//!
//! `Stopwatch` runs on `tokio::time::Instant`, so it follows the paused test
//! clock the same way the statistics engine does.

use std::time::Duration;
use tokio::time::Instant;

/// Elapsed-time tracker with an optional period
///
/// `is_time_over` fires once per period and re-arms itself, which is how the
/// runner decides when to emit its progress line.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
    period: Option<Duration>,
}

impl Stopwatch {
    /// Start a stopwatch with no period
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            period: None,
        }
    }

    /// Start a stopwatch that fires every `period`
    pub fn with_period(period: Duration) -> Self {
        Self {
            started: Instant::now(),
            period: Some(period),
        }
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Restart from now
    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    /// True once the period has elapsed; restarts the stopwatch when it fires
    ///
    /// Always false for a stopwatch without a period.
    pub fn is_time_over(&mut self) -> bool {
        match self.period {
            Some(period) if self.elapsed() >= period => {
                self.reset();
                true
            }
            _ => false,
        }
    }
}

/// Format a duration in human-readable form
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use kvpulse::util::time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
/// assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50us");
/// assert_eq!(format_duration(Duration::from_micros(2500)), "2.50ms");
/// assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();

    if nanos < 1_000 {
        format!("{}ns", nanos)
    } else if nanos < 1_000_000 {
        format!("{:.2}us", nanos as f64 / 1_000.0)
    } else if nanos < 1_000_000_000 {
        format!("{:.2}ms", nanos as f64 / 1_000_000.0)
    } else {
        format!("{:.2}s", nanos as f64 / 1_000_000_000.0)
    }
}

/// Format a rate (operations per second)
///
/// # Examples
///
/// ```
/// use kvpulse::util::time::format_rate;
///
/// assert_eq!(format_rate(500.0), "500");
/// assert_eq!(format_rate(1500.0), "1.50K");
/// assert_eq!(format_rate(2_500_000.0), "2.50M");
/// ```
pub fn format_rate(rate: f64) -> String {
    if rate < 1_000.0 {
        format!("{:.0}", rate)
    } else if rate < 1_000_000.0 {
        format!("{:.2}K", rate / 1_000.0)
    } else if rate < 1_000_000_000.0 {
        format!("{:.2}M", rate / 1_000_000.0)
    } else {
        format!("{:.2}G", rate / 1_000_000_000.0)
    }
}

/// Format an integer count with thousands separators
///
/// ```
/// use kvpulse::util::time::format_count;
///
/// assert_eq!(format_count(1234567), "1,234,567");
/// ```
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Format a latency in milliseconds with two decimals and thousands separators
pub fn format_millis(value: f64) -> String {
    if !value.is_finite() {
        return format!("{}", value);
    }
    let rounded = format!("{:.2}", value.abs());
    let (whole, frac) = rounded.split_once('.').unwrap_or((rounded.as_str(), "00"));
    let whole: u64 = whole.parse().unwrap_or(0);
    let sign = if value < 0.0 && rounded != "0.00" { "-" } else { "" };
    format!("{}{}.{}", sign, format_count(whole), frac)
}

/// Calculate operations per second from a count and the span it covers
///
/// Returns 0 for an empty span.
pub fn calculate_rate(operations: u64, duration: Duration) -> f64 {
    let seconds = duration.as_secs_f64();
    if seconds > 0.0 {
        operations as f64 / seconds
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stopwatch_elapsed() {
        let watch = Stopwatch::start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(watch.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopwatch_period_rearms() {
        let mut watch = Stopwatch::with_period(Duration::from_secs(4));
        assert!(!watch.is_time_over());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(watch.is_time_over());
        // Re-armed
        assert!(!watch.is_time_over());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(watch.is_time_over());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopwatch_without_period_never_fires() {
        let mut watch = Stopwatch::start();
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(!watch.is_time_over());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
        assert_eq!(format_duration(Duration::from_nanos(1500)), "1.50us");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::from_secs(5)), "5.00s");
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(500.0), "500");
        assert_eq!(format_rate(1500.0), "1.50K");
        assert_eq!(format_rate(1_500_000.0), "1.50M");
        assert_eq!(format_rate(1_500_000_000.0), "1.50G");
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(12_345_678), "12,345,678");
    }

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(0.0), "0.00");
        assert_eq!(format_millis(1.234), "1.23");
        assert_eq!(format_millis(12345.678), "12,345.68");
        assert_eq!(format_millis(-2.5), "-2.50");
    }

    #[test]
    fn test_calculate_rate() {
        assert_eq!(calculate_rate(1000, Duration::from_secs(10)), 100.0);
        assert_eq!(calculate_rate(1000, Duration::ZERO), 0.0);
    }
}
