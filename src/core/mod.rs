//! Process execution and per-file classification

pub mod check_result;
pub mod process_runner;
pub mod validator;

pub use check_result::{CheckResult, CheckStatus};
pub use process_runner::{run_process, ProcessInvocation, ProcessOutcome, ProcessRegistry};
pub use validator::Validator;
