//! Bounded-parallel execution of file checks
//!
//! Each file is checked on a dedicated rayon pool sized to the configured worker
//! count. Workers send their result over a channel to the collecting thread, so
//! no result list is shared between threads. When the batch ceiling elapses,
//! queued checks are skipped and live child processes are killed.

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::core::check_result::{CheckResult, CheckStatus};
use crate::core::process_runner::ProcessRegistry;
use crate::core::validator::Validator;

/// Results of one batch, plus how many were expected
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<CheckResult>,
    pub expected: usize,
}

impl BatchOutcome {
    /// Number of files whose check did not finish before the batch ceiling
    pub fn shortfall(&self) -> usize {
        self.expected.saturating_sub(self.results.len())
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall() == 0
    }
}

pub struct Scheduler {
    workers: usize,
    batch_timeout: Duration,
    progress: ProgressBar,
}

impl Scheduler {
    pub fn new(workers: usize, batch_timeout: Duration) -> Self {
        Self {
            workers: workers.max(1),
            batch_timeout,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report progress on `progress`, one tick per collected result
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Validate every file with `validator`
    ///
    /// Processes still running at the batch ceiling are killed through the
    /// validator's registry.
    pub fn run(&self, validator: Validator, files: Vec<PathBuf>) -> Result<BatchOutcome> {
        let registry = validator.registry().clone();
        let validator = Arc::new(validator);
        self.execute(files, move |path| validator.check_file(path), Some(registry))
    }

    /// Run `check` once per file and collect the results
    ///
    /// A panicking check becomes a `PROCESS_ERROR` result for its file. Checks
    /// still running when the batch ceiling elapses are abandoned and show up
    /// as a shortfall in the returned outcome; queued checks never start.
    pub fn run_with<F>(&self, files: Vec<PathBuf>, check: F) -> Result<BatchOutcome>
    where
        F: Fn(&Path) -> CheckResult + Send + Sync + 'static,
    {
        self.execute(files, check, None)
    }

    fn execute<F>(&self, files: Vec<PathBuf>, check: F, registry: Option<ProcessRegistry>) -> Result<BatchOutcome>
    where
        F: Fn(&Path) -> CheckResult + Send + Sync + 'static,
    {
        let expected = files.len();
        if expected == 0 {
            return Ok(BatchOutcome {
                results: Vec::new(),
                expected,
            });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("health-worker-{}", i))
            .build()
            .context("Failed to build thread pool")?;

        info!(files = expected, workers = self.workers, "starting batch");

        let check = Arc::new(check);
        let abandoned = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        for path in files {
            let tx = tx.clone();
            let check = Arc::clone(&check);
            let abandoned = Arc::clone(&abandoned);
            pool.spawn(move || {
                if abandoned.load(Ordering::SeqCst) {
                    return;
                }
                let result = panic::catch_unwind(AssertUnwindSafe(|| check(&path)))
                    .unwrap_or_else(|payload| task_failure(&path, payload));
                let _ = tx.send(result);
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.batch_timeout;
        let mut results = Vec::with_capacity(expected);
        while results.len() < expected {
            match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(result) => {
                    self.progress.inc(1);
                    results.push(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    abandoned.store(true, Ordering::SeqCst);
                    let killed = registry.as_ref().map_or(0, ProcessRegistry::cancel);
                    warn!(
                        missing = expected - results.len(),
                        killed,
                        timeout_secs = self.batch_timeout.as_secs(),
                        "batch ceiling reached, abandoning unfinished checks"
                    );
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!(missing = expected - results.len(), "workers exited without reporting");
                    break;
                }
            }
        }

        Ok(BatchOutcome { results, expected })
    }
}

fn task_failure(path: &Path, payload: Box<dyn Any + Send>) -> CheckResult {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());

    error!(file = %path.display(), %reason, "check task panicked");
    CheckResult::new(
        path.display().to_string(),
        CheckStatus::ProcessError,
        format!("check task failed: {}", reason),
    )
}
