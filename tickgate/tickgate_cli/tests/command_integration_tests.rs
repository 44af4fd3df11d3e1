use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn tickgate() -> Command {
    let mut cmd = Command::cargo_bin("tickgate").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_config_prints_defaults() {
    tickgate()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[dispatcher]"))
        .stdout(predicate::str::contains("time_budget_ms = 10.0"))
        .stdout(predicate::str::contains("refill_batch_size = 2"))
        .stdout(predicate::str::contains("level = \"info\""));
}

#[test]
fn test_config_reads_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tickgate.toml");
    fs::write(&path, "[pool]\nrefill_batch_size = 3\n").unwrap();

    tickgate()
        .args(["config", "--json", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"refill_batch_size\": 3"))
        .stdout(predicate::str::contains("\"time_budget_ms\": 10.0"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tickgate.toml");
    fs::write(&path, "[dispatcher]\ntime_budget_ms = -1.0\n").unwrap();

    tickgate()
        .arg("config")
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("time_budget_ms"));
}

#[test]
fn test_missing_config_file() {
    tickgate()
        .args(["config", "--config", "/nonexistent/tickgate.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_unknown_log_level() {
    tickgate()
        .args(["--log-level", "loud", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown log level 'loud'"));
}

#[test]
fn test_run_prints_report() {
    tickgate()
        .args([
            "--log-level",
            "warn",
            "run",
            "--ticks",
            "5",
            "--tick-ms",
            "1",
            "--producers",
            "2",
            "--jobs-per-producer",
            "10",
            "--pool-requests",
            "3",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tickgate run report"))
        .stdout(predicate::str::contains("Jobs executed:      20/20"));
}

#[test]
fn test_run_json_report() {
    let output = tickgate()
        .args([
            "--log-level",
            "error",
            "run",
            "--ticks",
            "10",
            "--tick-ms",
            "1",
            "--producers",
            "3",
            "--jobs-per-producer",
            "20",
            "--pool-requests",
            "5",
            "--budget-ms",
            "2",
            "--batch-size",
            "4",
            "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["ticks"], 10);
    assert_eq!(report["time_budget_ms"], 2.0);
    assert_eq!(report["jobs_submitted"], 60);
    assert_eq!(report["jobs_executed"], 60);
    // Each producer syncs on every tenth job
    assert_eq!(report["blocking_sends"], 6);
    assert_eq!(report["pending_at_shutdown"], 0);

    let pool = &report["pool"];
    assert_eq!(pool["requests"], 5);
    assert_eq!(pool["placed"], 5);
    assert_eq!(pool["refills_failed"], 0);
    // Pre-warmed with one batch of four; sprites are returned after use
    assert_eq!(pool["resources_constructed"], 4);
    assert_eq!(pool["buffered"], 4);
}

#[test]
fn test_run_rejects_invalid_overrides() {
    tickgate()
        .args(["run", "--ticks", "1", "--batch-size", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("refill_batch_size"));

    tickgate()
        .args(["run", "--ticks", "1", "--tick-ms=-5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tick-ms"));
}
