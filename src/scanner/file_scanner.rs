//! Script file discovery

use std::ffi::OsStr;
use std::path::PathBuf;
use tracing::{debug, error};
use walkdir::{DirEntry, WalkDir};

use crate::config::CheckerConfig;

/// Collect all target script files under the configured root
///
/// Directories whose name is in the exclusion set are pruned at any depth.
/// Unreadable directories and symlink loops are skipped. A missing root yields
/// an empty list and a logged diagnostic; discovery never fails.
pub fn collect_script_files(config: &CheckerConfig) -> Vec<PathBuf> {
    let root = &config.root;
    if !root.is_dir() {
        error!(root = %root.display(), "project root does not exist or is not a directory");
        return Vec::new();
    }

    let extension = OsStr::new(&config.extension);
    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| !is_excluded(entry, config));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };

        if entry.file_type().is_file() && entry.path().extension() == Some(extension) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    files
}

fn is_excluded(entry: &DirEntry, config: &CheckerConfig) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map_or(false, |name| config.is_excluded_dir(name))
}
