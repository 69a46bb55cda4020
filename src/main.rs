use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use script_health_rs::prelude::*;

#[derive(Parser)]
#[command(name = "script_health_rs")]
#[command(about = "Run every script in a project and classify why the failing ones fail", long_about = None)]
struct Cli {
    /// Project root to scan for script files
    directory: PathBuf,

    /// Interpreter used for both the primary and the parse check
    #[arg(long, default_value = "python")]
    interpreter: String,

    /// Extra argument passed to the interpreter before the script (repeatable)
    #[arg(long = "interpreter-arg", allow_hyphen_values = true)]
    interpreter_args: Vec<String>,

    /// Number of parallel worker threads (default: number of CPUs)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Primary check timeout in seconds (0 = wait indefinitely)
    #[arg(short, long, default_value_t = 0)]
    timeout: u64,

    /// Parse check timeout in seconds
    #[arg(long, default_value_t = 10)]
    parse_timeout: u64,

    /// Ceiling for the whole batch in seconds
    #[arg(long, default_value_t = 1800)]
    batch_timeout: u64,

    /// Additional directory name to skip during discovery (repeatable)
    #[arg(long)]
    exclude: Vec<String>,

    /// Directory prepended to the module search path of every check
    #[arg(long)]
    search_path: Option<PathBuf>,

    /// Environment variable holding the module search path
    #[arg(long, default_value = "PYTHONPATH")]
    search_path_var: String,

    /// What the primary check does with each file
    #[arg(long, value_enum, default_value_t = CheckMode::Run)]
    mode: CheckMode,

    /// Module run by `--mode lint`
    #[arg(long, default_value = "pyflakes")]
    lint_module: String,

    /// How to report files that fail at runtime but parse cleanly
    #[arg(long, value_enum, default_value_t = EnvironmentalPolicy::Warn)]
    policy: EnvironmentalPolicy,

    /// Maximum characters of captured output kept per file
    #[arg(long, default_value_t = 1000)]
    max_output_chars: usize,

    /// Write results as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,

    /// Write results as CSV to this path
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write the text summary to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Run in batch mode (no progress bar)
    #[arg(long)]
    batch: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn into_config(self) -> CheckerConfig {
        let mut config = CheckerConfig::new(self.directory)
            .with_interpreter(self.interpreter, self.interpreter_args)
            .with_check_timeout(Duration::from_secs(self.timeout))
            .with_parse_timeout(Duration::from_secs(self.parse_timeout))
            .with_batch_timeout(Duration::from_secs(self.batch_timeout))
            .with_mode(self.mode)
            .with_policy(self.policy);

        for name in self.exclude {
            config = config.exclude(name);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(dir) = self.search_path {
            config = config.with_search_path(dir);
        }

        config.search_path_var = self.search_path_var;
        config.lint_module = self.lint_module;
        config.max_output_chars = self.max_output_chars;
        config.json_output = self.json;
        config.csv_output = self.csv;
        config.report_output = self.report;
        config
    }
}

/// Log level used when `RUST_LOG` is unset
fn default_level(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        _ => "debug",
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose, quiet)));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    // Children run in their own process groups and never see the terminal's SIGINT
    let registry = ProcessRegistry::new();
    let interrupted = registry.clone();
    ctrlc::set_handler(move || {
        let killed = interrupted.cancel();
        eprintln!("\nInterrupted, killed {} running check(s), exiting without a report.", killed);
        std::process::exit(130);
    })
    .context("Error setting Ctrl-C handler")?;

    let batch = cli.batch;
    let config = cli.into_config();

    println!("Script Health Checker");
    println!("Using {} worker thread(s)", config.worker_count());
    println!();

    let progress = if batch {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .context("Invalid progress bar template")?
                .progress_chars("#>-"),
        );
        pb
    };

    let report = match run_with_progress(config.clone(), progress.clone(), registry) {
        Ok(report) => report,
        Err(e) => {
            progress.finish_and_clear();
            return Err(e);
        }
    };
    progress.finish_and_clear();

    if report.total() == 0 && report.shortfall == 0 {
        println!("No script files found in the specified directory.");
    }
    print!("{}", report);

    let artifacts = write_artifacts(&config, &report);
    for path in &artifacts.written {
        println!("Report saved to: {}", path.display());
    }

    if artifacts.failures.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        for (path, e) in &artifacts.failures {
            eprintln!("Error writing {}: {:#}", path.display(), e);
        }
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_levels() {
        assert_eq!(default_level(0, false), "warn");
        assert_eq!(default_level(1, false), "info");
        assert_eq!(default_level(2, false), "debug");
        assert_eq!(default_level(5, false), "debug");
        assert_eq!(default_level(0, true), "error");
    }

    #[test]
    fn test_cli_maps_onto_config() {
        let cli = Cli::parse_from(["script_health_rs", "proj", "-w", "3", "-t", "0", "--exclude", "build"]);
        let config = cli.into_config();
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.check_timeout, None);
        assert!(config.is_excluded_dir("build"));
        assert_eq!(config.mode, CheckMode::Run);
        assert_eq!(config.environmental_policy, EnvironmentalPolicy::Warn);
    }
}
