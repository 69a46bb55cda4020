//! File discovery and parallel scheduling

pub mod file_scanner;
pub mod scheduler;

pub use file_scanner::collect_script_files;
pub use scheduler::{BatchOutcome, Scheduler};
