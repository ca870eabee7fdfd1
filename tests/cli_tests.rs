use std::path::PathBuf;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("braid-test-{}-{name}", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn runs_without_arguments() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("braid"));
}

#[test]
fn check_reports_success() {
    let path = write_temp("check.s", "start:\n    ld 5, %a\n    reset\n");
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("check").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Finished"));
}

#[test]
fn check_rejects_bad_source() {
    let path = write_temp("bad.s", "frobnicate %a\n");
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("check").arg(&path);
    cmd.assert().failure();
}

#[test]
fn expand_prints_preprocessed_text() {
    let path = write_temp("expand.s", "#define N 3\npush N\nreset\n");
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("expand").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("push 3"));
}

#[test]
fn run_executes_until_reset() {
    let path = write_temp("run.s", "ld 7, %a\nst %a, [300]\nreset\n");
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("run").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Completed"));
}
