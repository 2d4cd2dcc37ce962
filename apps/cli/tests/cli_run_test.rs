//! Integration tests for the `foreman` binary.
//!
//! Without a config file every role uses the offline mock backend, so these
//! runs never touch the network.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const MOCK_CONFIG: &str = r#"
strategy = "mock"
task_iter = 2
refine_iter = 1

[orchestrator]
model = "mock-orchestrator"

[subagent]
model = "mock-subagent"

[refiner]
model = "mock-refiner"
max_tokens = 8192
"#;

fn foreman() -> Command {
    let mut cmd = Command::cargo_bin("foreman").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_run_with_mock_backends_writes_archives() {
    let temp_dir = TempDir::new().unwrap();
    let output_dir = temp_dir.path().join("out");

    foreman()
        .arg("run")
        .arg("--objective")
        .arg("write a haiku")
        .arg("--output-dir")
        .arg(&output_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Run finished"))
        .stdout(predicate::str::contains(".zip"));

    let written: Vec<_> = std::fs::read_dir(&output_dir).unwrap().collect();
    assert_eq!(written.len(), 3);
}

#[test]
fn test_run_json_summary() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("notes.txt");
    std::fs::write(&input, "keep it short").unwrap();

    let assert = foreman()
        .arg("run")
        .arg("--objective")
        .arg("write a haiku")
        .arg("--file")
        .arg(&input)
        .arg("--output-dir")
        .arg(temp_dir.path().join("out"))
        .arg("--json")
        .assert()
        .success();

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["completed"], true);
    assert_eq!(summary["eras"], 1);
    assert_eq!(summary["truncated"], false);
    assert!(summary["stored"]["run_archive"].as_str().unwrap().ends_with("_final.zip"));
}

#[test]
fn test_run_requires_objective() {
    foreman()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("an objective is required"));
}

#[test]
fn test_check_valid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("foreman.toml");
    std::fs::write(&config, MOCK_CONFIG).unwrap();

    foreman()
        .arg("check")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("mock-refiner"));
}

#[test]
fn test_check_rejects_unknown_provider() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("foreman.toml");
    std::fs::write(&config, MOCK_CONFIG.replace("mock-subagent", "gpt-4")).unwrap();

    foreman()
        .arg("check")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("subagent"));
}
