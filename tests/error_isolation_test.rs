//! Per-file failures never abort the batch
//!
//! Problems with the checking machinery become classified results for the
//! affected files while every other file is still checked.

#![cfg(unix)]

mod common;

use common::*;
use script_health_rs::prelude::*;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[test]
fn test_missing_interpreter_yields_process_error_per_file() {
    let fixture = Fixture::new();
    fixture.write("a.py", OK_SOURCE);
    fixture.write("b.py", BROKEN_SOURCE);

    let config = fixture
        .config()
        .with_interpreter("/nonexistent/python-xyz123", Vec::<String>::new());
    let report = run(config).unwrap();

    assert_eq!(report.total(), 2);
    assert_eq!(report.count(CheckStatus::ProcessError), 2);
    assert!(report.results.iter().all(|r| r.message.contains("could not launch")));
}

#[test]
fn test_vanished_file_is_process_error() {
    let fixture = Fixture::new();
    let validator = Validator::new(fixture.config());

    let result = validator.check_file(&fixture.root().join("vanished.py"));
    assert_eq!(result.status, CheckStatus::ProcessError);
    assert!(result.message.contains("could not read"), "message was: {}", result.message);
}

#[test]
fn test_parse_check_honours_sentinels() {
    let fixture = Fixture::new();
    let good = fixture.write("good.py", OK_SOURCE);
    let broken = fixture.write("broken.py", BROKEN_SOURCE);
    let validator = Validator::new(fixture.config());

    assert_eq!(validator.parse_check(&good).unwrap(), ParseVerdict::Valid);
    assert_eq!(
        validator.parse_check(&broken).unwrap(),
        ParseVerdict::Defect("SyntaxError: invalid syntax (line 3)".to_string())
    );
}

#[test]
fn test_panicking_check_is_isolated() {
    let files: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("/p/f{}.py", i))).collect();
    let scheduler = Scheduler::new(3, Duration::from_secs(30));

    let outcome = scheduler
        .run_with(files, |path| {
            if path.ends_with("f7.py") {
                panic!("unexpected state");
            }
            CheckResult::ok(path.display().to_string())
        })
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.results.len(), 10);
    let report = Report::from_results(outcome.results);
    assert_eq!(report.count(CheckStatus::ProcessError), 1);
    assert_eq!(report.count(CheckStatus::Ok), 9);
}

#[test]
fn test_parse_check_timeout_is_process_error() {
    let fixture = Fixture::new();
    let path = fixture.write("a.py", ENV_FAILURE_SOURCE);

    // the interpreter ignores its script arguments and never prints a sentinel
    let config = CheckerConfig::new(fixture.root())
        .with_interpreter("/bin/sh", ["-c", "sleep 5", "sh"])
        .with_parse_timeout(Duration::from_millis(200));
    let verdict = Validator::new(config).parse_check(&path).unwrap();

    assert!(matches!(verdict, ParseVerdict::Inconclusive(_)));
}

#[test]
fn test_batch_ceiling_stops_every_check() {
    let fixture = Fixture::new();
    let files: Vec<PathBuf> = ["a.py", "b.py", "c.py"]
        .iter()
        .map(|name| fixture.write(name, OK_SOURCE))
        .collect();

    // `$0` is the checked file
    let config = fixture
        .config()
        .with_interpreter("/bin/sh", ["-c", "touch \"$0.started\"; sleep 2; touch \"$0.finished\""])
        .with_workers(1)
        .with_batch_timeout(Duration::from_millis(500));
    let report = run(config).unwrap();

    assert_eq!(report.total(), 0);
    assert_eq!(report.shortfall, 3);

    thread::sleep(Duration::from_secs(4));
    let marked = |suffix: &str| {
        files
            .iter()
            .filter(|file| PathBuf::from(format!("{}{}", file.display(), suffix)).exists())
            .count()
    };
    assert_eq!(marked(".started"), 1);
    assert_eq!(marked(".finished"), 0);
}
