//! Report output
//!
//! A finished [`RunReport`](crate::runner::RunReport) can be printed as a
//! console summary and written to CSV and JSON files. The result line is
//! always printed by the binary; everything here is optional.

pub mod csv;
pub mod json;
pub mod text;

use crate::config::{Config, OutputConfig};
use crate::runner::RunReport;
use crate::Result;
use tracing::info;

/// Write every report the output configuration asks for
pub fn write_reports(report: &RunReport, config: &Config) -> Result<()> {
    let output: &OutputConfig = &config.output;

    if !output.quiet {
        text::print_results(report);
    }

    if let Some(path) = &output.csv {
        csv::write_csv_report(path, report)?;
        info!(path = %path.display(), "CSV report written");
    }

    if let Some(path) = &output.json {
        let document = json::build_document(report, config);
        json::write_json_output(path, &document, true)?;
        info!(path = %path.display(), "JSON report written");
    }

    Ok(())
}
