//! End-to-end run: setup checks, discovery, parallel validation, report

use anyhow::{Error, Result};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::CheckerConfig;
use crate::core::process_runner::ProcessRegistry;
use crate::core::validator::Validator;
use crate::error::SetupError;
use crate::reporting::report_writer::{write_csv_report, write_json_report, write_text_report, Report};
use crate::scanner::file_scanner::collect_script_files;
use crate::scanner::scheduler::Scheduler;

/// Check setup-level preconditions and resolve the root to an absolute path
pub fn validate_setup(mut config: CheckerConfig) -> Result<CheckerConfig, SetupError> {
    let root = config.root.clone();
    if !root.exists() {
        return Err(SetupError::RootMissing(root));
    }
    if !root.is_dir() {
        return Err(SetupError::RootNotDirectory(root));
    }
    config.root = std::path::absolute(&root).map_err(|source| SetupError::RootUnresolvable {
        path: root.clone(),
        source,
    })?;

    if let Some(dir) = &config.search_path {
        if !dir.is_dir() {
            return Err(SetupError::SearchPathMissing(dir.clone()));
        }
    }

    Ok(config)
}

/// Run a full batch over the configured root
pub fn run(config: CheckerConfig) -> Result<Report> {
    run_with_progress(config, ProgressBar::hidden(), ProcessRegistry::new())
}

/// Run a full batch, ticking `progress` once per checked file
///
/// Every child process is tracked in `registry`, so cancelling it from another
/// thread kills the live checks. Fails only on setup faults; per-file problems
/// are part of the report.
pub fn run_with_progress(config: CheckerConfig, progress: ProgressBar, registry: ProcessRegistry) -> Result<Report> {
    let config = validate_setup(config)?;

    let files = collect_script_files(&config);
    info!(root = %config.root.display(), files = files.len(), "discovered script files");
    if files.is_empty() {
        return Ok(Report::from_results(Vec::new()));
    }

    progress.set_length(files.len() as u64);
    let scheduler = Scheduler::new(config.worker_count(), config.batch_timeout).with_progress(progress);
    let outcome = scheduler.run(Validator::new(config).with_registry(registry), files)?;

    if !outcome.is_complete() {
        warn!(
            expected = outcome.expected,
            collected = outcome.results.len(),
            "batch finished with missing results"
        );
    }

    let shortfall = outcome.shortfall();
    Ok(Report::from_results(outcome.results).with_shortfall(shortfall))
}

/// Artifacts written by [`write_artifacts`]
#[derive(Debug, Default)]
pub struct ArtifactSummary {
    pub written: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, Error)>,
}

/// Write every configured artifact
///
/// A failing artifact does not stop the others from being written.
pub fn write_artifacts(config: &CheckerConfig, report: &Report) -> ArtifactSummary {
    let targets: [(Option<&Path>, fn(&Path, &Report) -> Result<()>); 3] = [
        (config.json_output.as_deref(), write_json_report),
        (config.csv_output.as_deref(), write_csv_report),
        (config.report_output.as_deref(), write_text_report),
    ];

    let mut summary = ArtifactSummary::default();
    for (path, write) in targets {
        let Some(path) = path else { continue };
        match write(path, report) {
            Ok(()) => {
                info!(path = %path.display(), "report written");
                summary.written.push(path.to_path_buf());
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                error!(path = %path.display(), error = %reason, "failed to write report");
                summary.failures.push((path.to_path_buf(), e));
            }
        }
    }
    summary
}
