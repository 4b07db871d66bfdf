//! Human-readable text output

use crate::runner::{OperationReport, RunReport};
use crate::util::time::{format_count, format_duration, format_millis, format_rate};

/// Print a run summary to the console
///
/// One block per phase, one row per operation. Slow statistics only show
/// once the window had filled when the phase was captured.
pub fn print_results(report: &RunReport) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    RUN RESULTS");
    println!("═══════════════════════════════════════════════════════════");
    println!();

    println!("Started:      {}", report.started_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Elapsed Time: {:.3}s", report.elapsed.as_secs_f64());
    println!(
        "Store:        {} entries preloaded (target {}), {} byte values",
        format_count(report.preloaded_entries as u64),
        format_count(report.num_entries),
        format_count(report.value_size as u64)
    );
    println!(
        "Keys:         [{}, {})",
        report.key_boundary.first, report.key_boundary.last
    );
    println!(
        "Window:       {} (measured for {})",
        format_duration(report.window),
        format_duration(report.measure_duration)
    );
    println!();

    print_phase("Baseline", &report.baseline);
    print_phase("Final", &report.final_stats);

    if report.cancelled > 0 {
        println!(
            "Cancelled:    {} in-flight operations at drain",
            report.cancelled
        );
        println!();
    }

    println!("═══════════════════════════════════════════════════════════");
}

fn print_phase(title: &str, rows: &[OperationReport]) {
    println!("{} (latency in ms):", title);
    println!(
        "  {:<14} {:>10} {:>9} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "operation", "n", "ops/s", "mean", "stddev", "min", "max", "failed"
    );

    if rows.is_empty() {
        println!("  No operations recorded");
    }

    for row in rows {
        println!("  {}", format_row(row));
    }
    println!();
}

fn format_row(row: &OperationReport) -> String {
    let stats = &row.stats;
    let mean = stats.mean.map(format_millis).unwrap_or_else(|| "-".to_string());
    let (stddev, min, max) = match stats.reportable_slow() {
        Some(slow) => (
            format_millis(slow.stddev),
            format_millis(slow.min),
            format_millis(slow.max),
        ),
        None => ("-".to_string(), "-".to_string(), "-".to_string()),
    };

    format!(
        "{:<14} {:>10} {:>9} {:>10} {:>10} {:>10} {:>10} {:>8}",
        row.operation,
        format_count(stats.n),
        format_rate(stats.rate_per_sec()),
        mean,
        stddev,
        min,
        max,
        format_count(row.failures)
    )
}
