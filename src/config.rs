//! Checker configuration
//!
//! Everything the orchestrator needs is passed in through [`CheckerConfig`];
//! there is no global state.

use clap::ValueEnum;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// Directory names skipped during discovery (compared case-insensitively)
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "venv",
    ".venv",
    "env",
    "deps",
    "site-packages",
    "__pycache__",
    "node_modules",
    ".git",
    ".tox",
];

pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 1000;

/// What the primary check does with a target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CheckMode {
    /// Execute the file as a script from its own directory
    #[default]
    Run,
    /// Import the file as a module from the project root
    Import,
    /// Run an external lint module over the file
    Lint,
}

/// How a failing primary check on a file that parses cleanly is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EnvironmentalPolicy {
    /// Report as OK, keeping the primary output
    Pass,
    /// Report as OK_WITH_WARNING, keeping the primary output
    #[default]
    Warn,
    /// Report as DEPENDENCY_FAILURE or RUNTIME_FAILURE from the primary output
    Classify,
}

#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Project root to scan
    pub root: PathBuf,
    /// Interpreter executable
    pub interpreter: String,
    /// Arguments placed before every script argument (e.g. `-X utf8`)
    pub interpreter_args: Vec<String>,
    /// Target script extension, without the dot
    pub extension: String,
    pub excluded_dirs: Vec<String>,
    /// Worker threads; `None` uses the host's available parallelism
    pub workers: Option<usize>,
    /// Primary check timeout; `None` waits indefinitely
    pub check_timeout: Option<Duration>,
    pub parse_timeout: Duration,
    /// Ceiling on the whole batch
    pub batch_timeout: Duration,
    /// Directory prepended to `search_path_var` for every child process
    pub search_path: Option<PathBuf>,
    pub search_path_var: String,
    pub mode: CheckMode,
    pub lint_module: String,
    pub environmental_policy: EnvironmentalPolicy,
    pub max_output_chars: usize,
    pub json_output: Option<PathBuf>,
    pub csv_output: Option<PathBuf>,
    pub report_output: Option<PathBuf>,
}

impl CheckerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            interpreter: "python".to_string(),
            interpreter_args: Vec::new(),
            extension: "py".to_string(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            workers: None,
            check_timeout: None,
            parse_timeout: DEFAULT_PARSE_TIMEOUT,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            search_path: None,
            search_path_var: "PYTHONPATH".to_string(),
            mode: CheckMode::default(),
            lint_module: "pyflakes".to_string(),
            environmental_policy: EnvironmentalPolicy::default(),
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            json_output: None,
            csv_output: None,
            report_output: None,
        }
    }

    pub fn with_interpreter<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.interpreter = program.into();
        self.interpreter_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout).filter(|t| !t.is_zero());
        self
    }

    pub fn with_parse_timeout(mut self, timeout: Duration) -> Self {
        self.parse_timeout = timeout;
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn with_search_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_path = Some(dir.into());
        self
    }

    pub fn with_mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_policy(mut self, policy: EnvironmentalPolicy) -> Self {
        self.environmental_policy = policy;
        self
    }

    /// Add a directory name to the exclusion set
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded_dirs.push(name.into());
        self
    }

    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs
            .iter()
            .any(|excluded| excluded.eq_ignore_ascii_case(name))
    }

    /// Worker count actually used by the scheduler
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        }
    }
}
