//! JSON output formatting
//!
//! The document carries the run metadata, the resolved settings, one entry
//! per operation and phase, and the result line exactly as printed.

use crate::config::Config;
use crate::runner::{OperationReport, RunReport};
use crate::util::time::format_duration;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            micros: d.as_micros() as u64,
            human: format_duration(d),
        }
    }
}

/// Run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRunInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub start_time: String,
    pub elapsed: JsonDuration,
    pub profile: String,
    pub store: String,
}

/// Settings the run actually used, after profile defaults were applied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSettings {
    pub operations: Vec<String>,
    pub num_entries: u64,
    pub value_size: usize,
    pub preloaded_entries: usize,
    pub key_first: i64,
    pub key_last: i64,
    pub window: JsonDuration,
    pub num_buckets: usize,
    pub measure_duration: JsonDuration,
    pub max_concurrency: usize,
}

/// Latency summary in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLatency {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// One operation at one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOperation {
    pub operation: String,
    pub phase: String,
    pub n: u64,
    pub ops_per_sec: f64,
    pub latency_ms: JsonLatency,
    pub window_span: JsonDuration,
    pub window_full_fraction: f64,
    pub window_filled: bool,
    pub invocations: u64,
    pub failures: u64,
}

impl JsonOperation {
    fn from_report(row: &OperationReport) -> Self {
        let stats = &row.stats;
        let slow = stats.reportable_slow();
        Self {
            operation: row.operation.clone(),
            phase: row.phase.to_string(),
            n: stats.n,
            ops_per_sec: stats.rate_per_sec(),
            latency_ms: JsonLatency {
                mean: stats.mean,
                stddev: slow.map(|s| s.stddev),
                min: slow.map(|s| s.min),
                max: slow.map(|s| s.max),
            },
            window_span: JsonDuration::from_duration(stats.window_span),
            window_full_fraction: stats.window_full_fraction,
            window_filled: stats.has_updated_after_window_filled,
            invocations: row.invocations,
            failures: row.failures,
        }
    }
}

/// Complete result document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonDocument {
    pub run: JsonRunInfo,
    pub settings: JsonSettings,
    pub operations: Vec<JsonOperation>,
    pub cancelled: usize,
    pub result_line: String,
}

/// Assemble the document for a finished run
pub fn build_document(report: &RunReport, config: &Config) -> JsonDocument {
    let hostname = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok());

    JsonDocument {
        run: JsonRunInfo {
            hostname,
            start_time: report.started_at.to_rfc3339(),
            elapsed: JsonDuration::from_duration(report.elapsed),
            profile: config.profile().to_string(),
            store: config.store.to_string(),
        },
        settings: JsonSettings {
            operations: config
                .workload
                .operations
                .iter()
                .map(|op| op.method_name().to_string())
                .collect(),
            num_entries: report.num_entries,
            value_size: report.value_size,
            preloaded_entries: report.preloaded_entries,
            key_first: report.key_boundary.first,
            key_last: report.key_boundary.last,
            window: JsonDuration::from_duration(report.window),
            num_buckets: config.stats.num_buckets,
            measure_duration: JsonDuration::from_duration(report.measure_duration),
            max_concurrency: config.max_concurrency(),
        },
        operations: report.rows().map(JsonOperation::from_report).collect(),
        cancelled: report.cancelled,
        result_line: report.result_line(),
    }
}

/// Write JSON output to file
pub fn write_json_output(output_path: &Path, document: &JsonDocument, pretty: bool) -> Result<()> {
    let file = BufWriter::new(File::create(output_path)?);

    if pretty {
        serde_json::to_writer_pretty(file, document)?;
    } else {
        serde_json::to_writer(file, document)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Phase;
    use crate::stats::{SlowStats, WindowStats};
    use crate::worker::KeyBoundary;
    use chrono::Local;

    fn report() -> RunReport {
        let stats = WindowStats {
            n: 100,
            total: 250.0,
            mean: Some(2.5),
            window_span: Duration::from_secs(2),
            window_full_fraction: 1.0,
            slow: Some(SlowStats {
                stddev: 0.5,
                min: 1.0,
                max: 4.0,
            }),
            has_updated_after_window_filled: true,
            refresh_cost: Duration::ZERO,
        };
        let row = |phase| OperationReport {
            operation: "isEmpty".to_string(),
            phase,
            stats: stats.clone(),
            invocations: 100,
            failures: 1,
        };

        RunReport {
            started_at: Local::now(),
            elapsed: Duration::from_millis(12_500),
            num_entries: 32,
            value_size: 8,
            preloaded_entries: 32,
            key_boundary: KeyBoundary::new(0, 32).unwrap(),
            measure_duration: Duration::from_secs(5),
            window: Duration::from_secs(2),
            baseline: vec![row(Phase::Baseline)],
            final_stats: vec![row(Phase::Final)],
            baseline_csv: "100,2.500,0.500,1.000,4.000".to_string(),
            final_csv: "100,2.500,0.500,1.000,4.000".to_string(),
            cancelled: 2,
        }
    }

    #[test]
    fn test_json_duration() {
        let d = JsonDuration::from_duration(Duration::from_micros(2500));
        assert_eq!(d.micros, 2500);
        assert_eq!(d.human, "2.50ms");
    }

    #[test]
    fn test_document_contents() {
        let report = report();
        let document = build_document(&report, &Config::default());

        assert_eq!(document.operations.len(), 2);
        assert_eq!(document.operations[0].phase, "baseline");
        assert_eq!(document.operations[1].phase, "final");
        assert_eq!(document.operations[1].latency_ms.max, Some(4.0));
        assert_eq!(document.operations[1].ops_per_sec, 50.0);
        assert_eq!(document.settings.key_last, 32);
        assert_eq!(document.settings.operations, vec!["isEmpty", "putIfAbsent"]);
        assert_eq!(document.run.profile, "local-test");
        assert_eq!(document.result_line, report.result_line());
    }

    #[test]
    fn test_unfilled_window_omits_slow_fields() {
        let mut report = report();
        report.final_stats[0].stats.has_updated_after_window_filled = false;
        let document = build_document(&report, &Config::default());

        let value = serde_json::to_value(&document.operations[1]).unwrap();
        assert!(value["latency_ms"].get("stddev").is_none());
        assert_eq!(value["latency_ms"]["mean"], 2.5);
    }

    #[test]
    fn test_write_json_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let document = build_document(&report(), &Config::default());
        write_json_output(file.path(), &document, true).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["cancelled"], 2);
        assert_eq!(value["settings"]["num_entries"], 32);
        assert_eq!(value["operations"][0]["failures"], 1);
    }
}
