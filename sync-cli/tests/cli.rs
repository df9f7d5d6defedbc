//! Binary-level tests for sync-cli.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli() -> Command {
    Command::cargo_bin("sync-cli").unwrap()
}

#[test]
fn status_on_empty_dir_reports_not_initialized() {
    let dir = tempdir().unwrap();
    cli()
        .args(["--data-dir", dir.path().to_str().unwrap(), "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("NOT INITIALIZED"));
}

#[test]
fn init_then_reset_then_status() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap();

    cli()
        .args([
            "--data-dir",
            data_dir,
            "init",
            "--account",
            "alice@example.com",
            "--server",
            "sync.example.com:443",
            "--passphrase",
            "correct horse battery",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Account initialized"));

    cli()
        .args(["--data-dir", data_dir, "reset"])
        .assert()
        .success();

    cli()
        .args(["--data-dir", data_dir, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("full sync pending"));
}

#[test]
fn reset_without_account_fails() {
    let dir = tempdir().unwrap();
    cli()
        .args(["--data-dir", dir.path().to_str().unwrap(), "reset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("sync-cli init"));
}
