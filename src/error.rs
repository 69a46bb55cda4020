//! Setup-level faults that abort a run before any file is checked

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("project root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("project root is not a directory: {0}")]
    RootNotDirectory(PathBuf),

    #[error("search path directory does not exist: {0}")]
    SearchPathMissing(PathBuf),

    #[error("cannot resolve project root {path}: {source}")]
    RootUnresolvable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
