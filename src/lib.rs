//! Script Health Checker Library
//!
//! Runs every script of a project in its own process, disambiguates failures
//! with a parse-only check, and aggregates the classified results.

pub mod config;
pub mod core;
pub mod error;
pub mod orchestrator;
pub mod reporting;
pub mod scanner;

pub use crate::core::validator;
pub use crate::reporting::report_writer;
pub use crate::scanner::file_scanner;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{CheckMode, CheckerConfig, EnvironmentalPolicy};
    pub use crate::core::check_result::{CheckResult, CheckStatus};
    pub use crate::core::process_runner::{
        run_process, CaptureMode, ProcessInvocation, ProcessOutcome, ProcessRegistry, TIMEOUT_EXIT_CODE,
    };
    pub use crate::core::validator::{interpret_parse_output, ParseVerdict, Validator};
    pub use crate::error::SetupError;
    pub use crate::orchestrator::{run, run_with_progress, validate_setup, write_artifacts, ArtifactSummary};
    pub use crate::reporting::report_writer::{
        render_summary, write_csv, write_csv_report, write_json_report, write_text_report, Report,
    };
    pub use crate::scanner::file_scanner::collect_script_files;
    pub use crate::scanner::scheduler::{BatchOutcome, Scheduler};
}
