//! Concurrency tests for treino.
//!
//! Several processes flushing the same queue must never commit a session
//! twice: the commit log is appended under an exclusive lock and
//! deduplicated by session id.

use assert_cmd::Command;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::TempDir;

const MONDAY: &str = "2024-01-15";

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("treino"))
}

fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

fn offline_workout(data_dir: &Path, day: &str, workout: &str) {
    cli()
        .arg("--data-dir")
        .arg(data_dir)
        .args(["--date", MONDAY, "--offline", "workout", "--day", day])
        .args(["--workout", workout, "--auto-complete", "--no-rest"])
        .assert()
        .success();
}

fn committed_session_ids(data_dir: &Path) -> Vec<String> {
    let content = fs::read_to_string(data_dir.join("remote/executions.jsonl"))
        .expect("Failed to read commit log");
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            let v: Value = serde_json::from_str(l).expect("valid commit line");
            v["session_id"].as_str().unwrap().to_string()
        })
        .collect()
}

#[test]
fn test_concurrent_sync_commits_each_session_once() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    offline_workout(&data_dir, "1", "Peito");
    offline_workout(&data_dir, "2", "Costas");
    offline_workout(&data_dir, "3", "Pernas");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let dir: PathBuf = data_dir.clone();
            thread::spawn(move || {
                cli()
                    .arg("--data-dir")
                    .arg(&dir)
                    .args(["--date", MONDAY, "sync"])
                    .assert()
                    .success();
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("sync thread panicked");
    }

    let ids = committed_session_ids(&data_dir);
    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 3, "sessions committed more than once: {:?}", ids);
    assert_eq!(unique.len(), 3);
}

#[test]
fn test_sequential_workouts_accumulate() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    for (day, workout) in [("1", "Peito"), ("3", "Costas"), ("5", "Pernas")] {
        cli()
            .arg("--data-dir")
            .arg(&data_dir)
            .args(["--date", MONDAY, "workout", "--day", day, "--workout", workout])
            .args(["--auto-complete", "--no-rest"])
            .assert()
            .success();
    }

    assert_eq!(committed_session_ids(&data_dir).len(), 3);
}
