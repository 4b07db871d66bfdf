//! CSV output formatting
//!
//! One row per operation and phase, latencies in milliseconds. Slow
//! statistics are left empty until the window has filled, the same way the
//! result line leaves them empty.

use crate::runner::{OperationReport, RunReport};
use crate::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const HEADER: &str = "operation,phase,n,mean,stddev,min,max,failures";

/// CSV writer for per-operation report rows
pub struct CsvWriter<W: Write> {
    out: W,
}

impl CsvWriter<BufWriter<File>> {
    /// Create the file and write the header row
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> CsvWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "{}", HEADER)?;
        Ok(Self { out })
    }

    pub fn append_row(&mut self, row: &OperationReport) -> Result<()> {
        writeln!(
            self.out,
            "{},{},{},{}",
            row.operation,
            row.phase,
            row.stats.to_csv(),
            row.failures
        )?;
        Ok(())
    }

    /// Flush and hand back the underlying writer
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

/// Write every row of a report to `path`
pub fn write_csv_report(path: &Path, report: &RunReport) -> Result<()> {
    let mut writer = CsvWriter::create(path)?;
    for row in report.rows() {
        writer.append_row(row)?;
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::Phase;
    use crate::stats::{SlowStats, WindowStats};
    use crate::worker::KeyBoundary;
    use chrono::Local;
    use std::time::Duration;

    fn report_row(operation: &str, phase: Phase, n: u64, filled: bool) -> OperationReport {
        OperationReport {
            operation: operation.to_string(),
            phase,
            stats: WindowStats {
                n,
                total: n as f64 * 1.5,
                mean: (n > 0).then_some(1.5),
                window_span: Duration::from_secs(2),
                window_full_fraction: if filled { 1.0 } else { 0.5 },
                slow: filled.then_some(SlowStats {
                    stddev: 0.25,
                    min: 1.0,
                    max: 2.0,
                }),
                has_updated_after_window_filled: filled,
                refresh_cost: Duration::ZERO,
            },
            invocations: n,
            failures: 0,
        }
    }

    #[test]
    fn test_rows_in_memory() {
        let mut writer = CsvWriter::new(Vec::new()).unwrap();
        writer
            .append_row(&report_row("get", Phase::Baseline, 4, true))
            .unwrap();
        writer
            .append_row(&report_row("get", Phase::Final, 0, false))
            .unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "get,baseline,4,1.500,0.250,1.000,2.000,0");
        assert_eq!(lines[2], "get,final,0,,,,,0");
    }

    #[test]
    fn test_write_report_file() {
        let report = RunReport {
            started_at: Local::now(),
            elapsed: Duration::from_secs(10),
            num_entries: 16,
            value_size: 8,
            preloaded_entries: 16,
            key_boundary: KeyBoundary::new(0, 16).unwrap(),
            measure_duration: Duration::from_secs(5),
            window: Duration::from_secs(2),
            baseline: vec![
                report_row("isEmpty", Phase::Baseline, 10, true),
                report_row("putIfAbsent", Phase::Baseline, 12, true),
            ],
            final_stats: vec![
                report_row("isEmpty", Phase::Final, 20, true),
                report_row("putIfAbsent", Phase::Final, 22, true),
            ],
            baseline_csv: String::new(),
            final_csv: String::new(),
            cancelled: 0,
        };

        let file = tempfile::NamedTempFile::new().unwrap();
        write_csv_report(file.path(), &report).unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[1].starts_with("isEmpty,baseline,10,"));
        assert!(lines[4].starts_with("putIfAbsent,final,22,"));
        assert!(lines.iter().all(|line| line.split(',').count() == 8));
    }
}
