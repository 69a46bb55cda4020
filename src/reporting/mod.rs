//! Report aggregation and artifact writing

pub mod report_writer;

pub use report_writer::{render_summary, Report};
