//! Shared fixtures: a temporary project and a fake interpreter
//!
//! The fake interpreter is a shell script run through `/bin/sh`, so tests do
//! not need Python. It honours the parse check sentinel contract and reacts to
//! marker comments in the target files:
//! - `MARK_SYNTAX`: fails to run and to parse (reported at the marker's line)
//! - `MARK_ENV_FAILURE`: fails to run with a connection error, parses
//! - `MARK_MISSING_MODULE`: fails to run with ModuleNotFoundError, parses
//! - `MARK_SLEEP`: runs for 30 seconds

#![allow(dead_code)]

use script_health_rs::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const FAKE_INTERPRETER: &str = r#"
if [ "$1" = "-c" ]; then
  if [ $# -lt 3 ]; then
    module=${2#import }
    case "$module" in
      *broken*) echo "ImportError: cannot import name 'thing' from '$module'" >&2; exit 1 ;;
    esac
    exit 0
  fi
  target="$3"
  if [ ! -r "$target" ]; then
    echo "SYNTAX_ERR:cannot_read:[Errno 2] No such file or directory: '$target'"
    exit 2
  fi
  if grep -q MARK_SYNTAX "$target"; then
    line=$(grep -n MARK_SYNTAX "$target" | head -n 1 | cut -d: -f1)
    echo "SYNTAX_ERR:SyntaxError:invalid syntax:line:$line"
    exit 2
  fi
  echo "SYNTAX_OK"
  exit 0
fi
if [ "$1" = "-m" ]; then
  shift 2
fi
target="$1"
if [ ! -r "$target" ]; then
  echo "can't open file '$target'" >&2
  exit 2
fi
if grep -q MARK_SYNTAX "$target"; then
  echo "SyntaxError: invalid syntax" >&2
  exit 1
fi
if grep -q MARK_SLEEP "$target"; then
  sleep 30
  exit 0
fi
if grep -q MARK_MISSING_MODULE "$target"; then
  echo "Traceback (most recent call last):" >&2
  echo "ModuleNotFoundError: No module named 'polars'" >&2
  exit 1
fi
if grep -q MARK_ENV_FAILURE "$target"; then
  echo "Traceback (most recent call last):" >&2
  echo "ConnectionRefusedError: [Errno 111] Connection refused" >&2
  exit 1
fi
echo "ran $target"
exit 0
"#;

pub const OK_SOURCE: &str = "import os\nprint(os.getcwd())\n";
pub const BROKEN_SOURCE: &str = "def main():\n    pass\nif True print('x')  # MARK_SYNTAX\n";
pub const ENV_FAILURE_SOURCE: &str = "import socket\n# MARK_ENV_FAILURE\n";
pub const MISSING_MODULE_SOURCE: &str = "import polars  # MARK_MISSING_MODULE\n";
pub const SLOW_SOURCE: &str = "import time\ntime.sleep(30)  # MARK_SLEEP\n";

pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("project")).unwrap();
        fs::create_dir_all(dir.path().join("tools")).unwrap();
        fs::write(dir.path().join("tools").join("fake_python.sh"), FAKE_INTERPRETER).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("project")
    }

    pub fn interpreter_script(&self) -> PathBuf {
        self.dir.path().join("tools").join("fake_python.sh")
    }

    /// Write a file relative to the project root, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn config(&self) -> CheckerConfig {
        CheckerConfig::new(self.root())
            .with_interpreter("/bin/sh", [self.interpreter_script().display().to_string()])
            .with_workers(4)
    }
}

/// Status recorded for the file whose identifier ends with `name`
pub fn status_of(report: &Report, name: &str) -> CheckStatus {
    report
        .results
        .iter()
        .find(|r| r.file.ends_with(name))
        .unwrap_or_else(|| panic!("no result for {}", name))
        .status
}
