//! Per-file classification results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome category of a single file check
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    /// Primary check exited cleanly
    Ok,
    /// Primary check failed but the file parses; failure attributed to the environment
    OkWithWarning,
    /// The file cannot be parsed
    SyntaxError,
    /// A required external module or package is unavailable
    DependencyFailure,
    /// Execution failed for another reason, including timeout
    RuntimeFailure,
    /// The checking machinery itself could not run
    ProcessError,
}

impl CheckStatus {
    /// All statuses in report order
    pub const ALL: [CheckStatus; 6] = [
        CheckStatus::Ok,
        CheckStatus::OkWithWarning,
        CheckStatus::SyntaxError,
        CheckStatus::DependencyFailure,
        CheckStatus::RuntimeFailure,
        CheckStatus::ProcessError,
    ];

    /// Wire name used in JSON and CSV artifacts
    pub fn as_str(self) -> &'static str {
        match self {
            CheckStatus::Ok => "OK",
            CheckStatus::OkWithWarning => "OK_WITH_WARNING",
            CheckStatus::SyntaxError => "SYNTAX_ERROR",
            CheckStatus::DependencyFailure => "DEPENDENCY_FAILURE",
            CheckStatus::RuntimeFailure => "RUNTIME_FAILURE",
            CheckStatus::ProcessError => "PROCESS_ERROR",
        }
    }

    /// Whether the status counts as a healthy file
    pub fn is_passing(self) -> bool {
        matches!(self, CheckStatus::Ok | CheckStatus::OkWithWarning)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking a single target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub file: String,
    pub status: CheckStatus,
    pub message: String,
    /// Captured output retained as diagnostic context, possibly truncated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl CheckResult {
    pub fn new(file: impl Into<String>, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            status,
            message: message.into(),
            output: None,
        }
    }

    pub fn ok(file: impl Into<String>) -> Self {
        Self::new(file, CheckStatus::Ok, "")
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        self.output = if output.is_empty() { None } else { Some(output) };
        self
    }
}

/// Truncate text to at most `max_chars` characters, marking the cut
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...(truncated)", &text[..cut]),
        None => text.to_string(),
    }
}
