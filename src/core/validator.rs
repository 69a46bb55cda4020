//! Two-tier file validation
//!
//! The primary check runs the file (or imports or lints it). A non-zero exit is
//! ambiguous, so a parse-only fallback check decides whether the file is
//! structurally broken or failed for environmental reasons.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::check_result::{truncate_output, CheckResult, CheckStatus};
use super::process_runner::{run_process, ProcessInvocation, ProcessOutcome, ProcessRegistry};
use crate::config::{CheckMode, CheckerConfig, EnvironmentalPolicy};

/// Printed by the parse check when the source parses
pub const PARSE_OK_TOKEN: &str = "SYNTAX_OK";
/// Prefix of every parse check failure line
pub const PARSE_ERR_PREFIX: &str = "SYNTAX_ERR:";
const UNREADABLE_PREFIX: &str = "cannot_read:";

/// Inline parse-only check; receives the target path as its first argument
const PARSE_CHECK_SOURCE: &str = r#"import ast, sys
path = sys.argv[1]
try:
    with open(path, 'r', encoding='utf-8') as handle:
        source = handle.read()
except Exception as exc:
    print('SYNTAX_ERR:cannot_read:' + str(exc))
    sys.exit(2)
try:
    ast.parse(source, filename=path)
except SyntaxError as exc:
    print('SYNTAX_ERR:%s:%s:line:%s' % (type(exc).__name__, exc.msg, exc.lineno))
    sys.exit(2)
except Exception as exc:
    print('SYNTAX_ERR:%s:%s' % (type(exc).__name__, exc))
    sys.exit(2)
print('SYNTAX_OK')
"#;

const MISSING_MODULE_MARKERS: &[&str] = &["ModuleNotFoundError", "ImportError", "No module named"];

/// Verdict of the parse-only fallback check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseVerdict {
    /// Source parses into a syntax tree
    Valid,
    /// Structural defect with its description and location
    Defect(String),
    /// The checker could not read the file
    Unreadable(String),
    /// The checker ran but honoured neither sentinel, or timed out
    Inconclusive(String),
}

/// Interpret parse check output according to the sentinel contract
pub fn interpret_parse_output(outcome: &ProcessOutcome) -> ParseVerdict {
    if outcome.timed_out() {
        return ParseVerdict::Inconclusive("parse check timed out".to_string());
    }

    let output = outcome.combined_output();
    if output.lines().any(|line| line.trim() == PARSE_OK_TOKEN) {
        return ParseVerdict::Valid;
    }

    if let Some(rest) = output
        .lines()
        .find_map(|line| line.trim().strip_prefix(PARSE_ERR_PREFIX))
    {
        return match rest.strip_prefix(UNREADABLE_PREFIX) {
            Some(reason) => ParseVerdict::Unreadable(reason.to_string()),
            None => ParseVerdict::Defect(describe_defect(rest)),
        };
    }

    if outcome.success() {
        ParseVerdict::Valid
    } else {
        ParseVerdict::Inconclusive(format!(
            "unrecognised parse check output (exit code {}): {}",
            outcome.exit_code,
            truncate_output(output.trim(), 200)
        ))
    }
}

/// `SyntaxError:invalid syntax:line:3` -> `SyntaxError: invalid syntax (line 3)`
fn describe_defect(raw: &str) -> String {
    let (head, line) = match raw.rsplit_once(":line:") {
        Some((head, line)) => (head, Some(line.trim())),
        None => (raw, None),
    };
    let description = match head.split_once(':') {
        Some((kind, msg)) => format!("{}: {}", kind, msg),
        None => head.to_string(),
    };
    // Python reports `None` for errors it cannot place
    match line.and_then(|line| line.parse::<u64>().ok()) {
        Some(line) => format!("{} (line {})", description, line),
        None => description,
    }
}

/// Dotted module name for `path` relative to `root`
///
/// `pkg/sub/mod.py` -> `pkg.sub.mod`, `pkg/__init__.py` -> `pkg`. Returns `None`
/// when the path is outside the root or a segment is not an identifier.
pub fn module_name(root: &Path, path: &Path, extension: &str) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments: Vec<String> = relative
        .iter()
        .map(|s| s.to_str().map(str::to_string))
        .collect::<Option<_>>()?;

    let suffix = format!(".{}", extension);
    let last = segments.pop()?;
    let stem = last.strip_suffix(&suffix)?;
    if stem != "__init__" {
        segments.push(stem.to_string());
    }

    let is_identifier = |s: &String| {
        let mut chars = s.chars();
        matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || c == '_')
    };
    if segments.is_empty() || !segments.iter().all(is_identifier) {
        return None;
    }
    Some(segments.join("."))
}

/// Runs the two-tier check for individual files
#[derive(Debug, Clone)]
pub struct Validator {
    config: CheckerConfig,
    registry: ProcessRegistry,
}

impl Validator {
    pub fn new(config: CheckerConfig) -> Self {
        Self {
            config,
            registry: ProcessRegistry::new(),
        }
    }

    /// Track every launched check in `registry`
    pub fn with_registry(mut self, registry: ProcessRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    /// Check one file; never fails, every problem becomes a classified result
    pub fn check_file(&self, path: &Path) -> CheckResult {
        let file = path.display().to_string();
        let result = match self.try_check_file(path) {
            Ok(result) => result,
            Err(e) => CheckResult::new(
                file,
                CheckStatus::RuntimeFailure,
                format!("check aborted: {:#}", e),
            ),
        };

        match result.status {
            CheckStatus::Ok => info!(file = %result.file, "OK"),
            CheckStatus::OkWithWarning => {
                warn!(file = %result.file, "failed at runtime but parses, treated as environmental")
            }
            status => warn!(file = %result.file, %status, message = %result.message, "check failed"),
        }
        result
    }

    fn try_check_file(&self, path: &Path) -> Result<CheckResult> {
        let path = std::path::absolute(path)?;
        let file = path.display().to_string();

        let invocation = match self.primary_invocation(&path) {
            Ok(invocation) => invocation,
            Err(reason) => return Ok(CheckResult::new(file, CheckStatus::ProcessError, reason)),
        };

        let primary = match run_process(&invocation) {
            Ok(outcome) => outcome,
            Err(e) => {
                return Ok(CheckResult::new(
                    file,
                    CheckStatus::ProcessError,
                    format!("primary check could not launch: {:#}", e),
                ))
            }
        };

        if primary.success() {
            return Ok(CheckResult::ok(file));
        }

        debug!(file = %file, exit_code = primary.exit_code, "primary check failed, running parse check");
        let verdict = match self.parse_check(&path) {
            Ok(verdict) => verdict,
            Err(e) => {
                return Ok(CheckResult::new(
                    file,
                    CheckStatus::ProcessError,
                    format!("parse check could not launch: {:#}", e),
                )
                .with_output(self.truncate(&primary.combined_output())))
            }
        };

        Ok(self.classify_failure(file, &primary, verdict))
    }

    fn primary_invocation(&self, path: &Path) -> std::result::Result<ProcessInvocation, String> {
        let config = &self.config;
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));

        let mut invocation = ProcessInvocation::new(&config.interpreter).args(&config.interpreter_args);
        invocation = match config.mode {
            CheckMode::Run => invocation.arg(path).current_dir(parent),
            CheckMode::Import => {
                let module = module_name(&config.root, path, &config.extension)
                    .ok_or_else(|| format!("cannot derive an importable module name for {}", path.display()))?;
                invocation
                    .arg("-c")
                    .arg(format!("import {}", module))
                    .current_dir(&config.root)
                    .prepend_search_path(&config.search_path_var, &config.root)
            }
            CheckMode::Lint => invocation
                .arg("-m")
                .arg(&config.lint_module)
                .arg(path)
                .current_dir(parent),
        };

        if let Some(dir) = &config.search_path {
            invocation = invocation.prepend_search_path(&config.search_path_var, dir);
        }

        Ok(invocation
            .timeout(config.check_timeout)
            .registry(self.registry.clone()))
    }

    /// Run the parse-only fallback check on `path`
    ///
    /// Errors only when the checker cannot be launched.
    pub fn parse_check(&self, path: &Path) -> Result<ParseVerdict> {
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        let invocation = ProcessInvocation::new(&self.config.interpreter)
            .args(&self.config.interpreter_args)
            .arg("-c")
            .arg(PARSE_CHECK_SOURCE)
            .arg(path)
            .current_dir(parent)
            .timeout(Some(self.config.parse_timeout))
            .registry(self.registry.clone());

        let outcome = run_process(&invocation)?;
        Ok(interpret_parse_output(&outcome))
    }

    fn classify_failure(&self, file: String, primary: &ProcessOutcome, verdict: ParseVerdict) -> CheckResult {
        let full_output = primary.combined_output();
        let output = self.truncate(full_output.trim_end());

        match verdict {
            ParseVerdict::Defect(defect) => {
                let message = if output.is_empty() {
                    defect
                } else {
                    format!("{} | runtime output: {}", defect, output)
                };
                CheckResult::new(file, CheckStatus::SyntaxError, message)
            }
            ParseVerdict::Unreadable(reason) => CheckResult::new(
                file,
                CheckStatus::ProcessError,
                format!("parse check could not read the file: {}", reason),
            )
            .with_output(output),
            ParseVerdict::Inconclusive(reason) => CheckResult::new(
                file,
                CheckStatus::ProcessError,
                format!("parse check failed: {}", reason),
            )
            .with_output(output),
            ParseVerdict::Valid if primary.timed_out() => {
                let limit = self
                    .config
                    .check_timeout
                    .map(|t| format!(" after {:.1}s", t.as_secs_f64()))
                    .unwrap_or_default();
                CheckResult::new(file, CheckStatus::RuntimeFailure, format!("timed out{}", limit))
                    .with_output(output)
            }
            ParseVerdict::Valid => self.classify_environmental(file, primary, &full_output, output),
        }
    }

    fn classify_environmental(
        &self,
        file: String,
        primary: &ProcessOutcome,
        full_output: &str,
        output: String,
    ) -> CheckResult {
        let summary = format!(
            "exited with code {} but parses cleanly: {}",
            primary.exit_code,
            last_meaningful_line(full_output).unwrap_or("no output")
        );

        match self.config.environmental_policy {
            EnvironmentalPolicy::Pass => CheckResult::new(file, CheckStatus::Ok, summary).with_output(output),
            EnvironmentalPolicy::Warn => {
                CheckResult::new(file, CheckStatus::OkWithWarning, summary).with_output(output)
            }
            EnvironmentalPolicy::Classify => match missing_module_line(full_output) {
                Some(line) => CheckResult::new(file, CheckStatus::DependencyFailure, line).with_output(output),
                None => CheckResult::new(
                    file,
                    CheckStatus::RuntimeFailure,
                    format!(
                        "exited with code {}: {}",
                        primary.exit_code,
                        last_meaningful_line(full_output).unwrap_or("no output")
                    ),
                )
                .with_output(output),
            },
        }
    }

    fn truncate(&self, text: &str) -> String {
        truncate_output(text, self.config.max_output_chars)
    }
}

fn last_meaningful_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

fn missing_module_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| MISSING_MODULE_MARKERS.iter().any(|m| line.contains(m)))
        .map(str::to_string)
}
