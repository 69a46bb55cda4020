//! Report aggregation and artifact writing

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::check_result::{CheckResult, CheckStatus};

/// All results of a run with per-status counts
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Results ordered by file identifier
    pub results: Vec<CheckResult>,
    pub counts: BTreeMap<CheckStatus, usize>,
    /// Checks abandoned at the batch ceiling
    pub shortfall: usize,
}

impl Report {
    pub fn from_results(mut results: Vec<CheckResult>) -> Self {
        results.sort_by(|a, b| a.file.cmp(&b.file));

        let mut counts: BTreeMap<CheckStatus, usize> =
            CheckStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for result in &results {
            *counts.entry(result.status).or_insert(0) += 1;
        }

        Self {
            results,
            counts,
            shortfall: 0,
        }
    }

    pub fn with_shortfall(mut self, shortfall: usize) -> Self {
        self.shortfall = shortfall;
        self
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn passing(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_passing()).count()
    }

    pub fn by_status(&self, status: CheckStatus) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(move |r| r.status == status)
    }
}

impl fmt::Display for Report {
    /// Human-readable summary grouped by status
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Script Health Report")?;
        writeln!(f, "====================")?;
        writeln!(f)?;
        writeln!(f, "Summary Statistics:")?;
        writeln!(f, "-------------------")?;
        writeln!(f, "  Total files checked: {}", self.total())?;
        for status in CheckStatus::ALL {
            writeln!(f, "  {}: {}", status, self.count(status))?;
        }
        if self.total() > 0 {
            let pct = (self.passing() as f64 / self.total() as f64) * 100.0;
            writeln!(f, "  Health rate: {:.2}%", pct)?;
        }
        if self.shortfall > 0 {
            writeln!(f, "  Unfinished checks: {}", self.shortfall)?;
        }
        writeln!(f)?;

        for status in CheckStatus::ALL {
            let count = self.count(status);
            if count == 0 {
                continue;
            }

            let heading = format!("{} ({}):", status, count);
            writeln!(f, "{}", heading)?;
            writeln!(f, "{}", "-".repeat(heading.len()))?;
            for result in self.by_status(status) {
                writeln!(f, "  {}", result.file)?;
                let detail = match status {
                    CheckStatus::Ok => None,
                    // passing files only need the headline
                    CheckStatus::OkWithWarning => result.message.lines().next(),
                    _ => Some(result.message.as_str()),
                };
                if let Some(detail) = detail.filter(|d| !d.trim().is_empty()) {
                    writeln!(f, "      {}", detail.trim_end().replace('\n', "\n      "))?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Human-readable summary grouped by status
pub fn render_summary(report: &Report) -> String {
    report.to_string()
}

/// Write the summary to a text file
pub fn write_text_report(output_path: &Path, report: &Report) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    write!(writer, "{}", report)?;
    writer.flush()?;
    Ok(())
}

/// Write results as a JSON array of `{file, status, message}` records
pub fn write_json_report(output_path: &Path, report: &Report) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &report.results).context("Failed to serialize results")?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write `file,status,message` rows with every field quoted
pub fn write_csv<W: Write>(writer: W, results: &[CheckResult]) -> Result<()> {
    let mut csv = WriterBuilder::new().quote_style(QuoteStyle::Always).from_writer(writer);
    csv.write_record(["file", "status", "message"])?;
    for result in results {
        csv.write_record([result.file.as_str(), result.status.as_str(), result.message.as_str()])?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_csv_report(output_path: &Path, report: &Report) -> Result<()> {
    let file = File::create(output_path)
        .with_context(|| format!("Failed to create {}", output_path.display()))?;
    write_csv(BufWriter::new(file), &report.results)
        .with_context(|| format!("Failed to write CSV to {}", output_path.display()))
}
