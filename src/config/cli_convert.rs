//! CLI to Config conversion utilities

use crate::config::workload::OperationKind;
use anyhow::{Context, Result};
use std::time::Duration;

/// Parse a size string (e.g., "8", "32k", "1M") to bytes
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if s.ends_with("kb") || s.ends_with('k') {
        (s.trim_end_matches("kb").trim_end_matches('k'), 1024u64)
    } else if s.ends_with("mb") || s.ends_with('m') {
        (s.trim_end_matches("mb").trim_end_matches('m'), 1024 * 1024)
    } else if s.ends_with("gb") || s.ends_with('g') {
        (s.trim_end_matches("gb").trim_end_matches('g'), 1024 * 1024 * 1024)
    } else {
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid size format: {}", s))?;

    num.checked_mul(multiplier)
        .with_context(|| format!("Size out of range: {}", s))
}

/// Parse a duration string (e.g., "500ms", "30s", "5m", "1h")
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    // Longest suffixes first: "ms" would otherwise match "s"
    let (num_str, unit) = if let Some(n) = s.strip_suffix("us") {
        (n, Duration::from_micros(1))
    } else if let Some(n) = s.strip_suffix("ms") {
        (n, Duration::from_millis(1))
    } else if let Some(n) = s.strip_suffix("min") {
        (n, Duration::from_secs(60))
    } else if let Some(n) = s.strip_suffix("sec") {
        (n, Duration::from_secs(1))
    } else if let Some(n) = s.strip_suffix('s') {
        (n, Duration::from_secs(1))
    } else if let Some(n) = s.strip_suffix('m') {
        (n, Duration::from_secs(60))
    } else if let Some(n) = s.strip_suffix('h') {
        (n, Duration::from_secs(3600))
    } else {
        (s.as_str(), Duration::from_secs(1))
    };

    let num: u32 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    unit.checked_mul(num)
        .with_context(|| format!("Duration out of range: {}", s))
}

/// Render a duration the way `parse_duration` reads it back
pub fn duration_to_string(duration: Duration) -> String {
    if duration.subsec_nanos() % 1_000_000 != 0 {
        format!("{}us", duration.as_micros())
    } else if duration.subsec_nanos() != 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{}s", duration.as_secs())
    }
}

/// Parse a comma-separated operation list (e.g., "is_empty,put_if_absent")
pub fn parse_operations(s: &str) -> Result<Vec<OperationKind>> {
    let operations = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<OperationKind>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Invalid operation list: {}", s))?;

    if operations.is_empty() {
        anyhow::bail!("Operation list is empty");
    }
    Ok(operations)
}
