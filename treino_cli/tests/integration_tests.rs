//! Integration tests for the treino binary.
//!
//! These tests verify end-to-end behavior including:
//! - Guarded plan editing and week review
//! - Workout sessions, online and offline
//! - Recovery of an interrupted session
//! - CSV export

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// 2024-01-14 is a Sunday; all dates below fall in ISO week 3
const MONDAY: &str = "2024-01-15";
const WEDNESDAY: &str = "2024-01-17";

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("treino"))
}

/// CLI invocation bound to a data directory and a fixed "today"
fn treino(data_dir: &Path, date: &str) -> Command {
    let mut cmd = cli();
    cmd.arg("--data-dir").arg(data_dir).arg("--date").arg(date);
    cmd
}

fn commit_log_lines(data_dir: &Path) -> usize {
    fs::read_to_string(data_dir.join("remote/executions.jsonl"))
        .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}

fn run_peito(data_dir: &Path, extra: &[&str]) -> assert_cmd::assert::Assert {
    treino(data_dir, MONDAY)
        .args(["workout", "--day", "1", "--workout", "Peito"])
        .args(["--auto-complete", "--no-rest"])
        .args(extra)
        .assert()
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Weekly workout planner and offline-safe session tracker",
        ));
}

#[test]
fn test_plan_set_and_show() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    treino(data_dir, MONDAY)
        .args(["plan", "set", "1", "mandatory", "Peito"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Monday set to Peito (mandatory)"));

    treino(data_dir, MONDAY)
        .args(["plan", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local/2024-W03"))
        .stdout(predicate::str::contains("Peito (mandatory)"))
        .stdout(predicate::str::contains("blocked by Monday"));
}

#[test]
fn test_duplicate_mandatory_is_rejected() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    treino(data_dir, MONDAY)
        .args(["plan", "set", "5", "mandatory", "Costas"])
        .assert()
        .success();

    treino(data_dir, MONDAY)
        .args(["plan", "set", "2", "mandatory", "Costas"])
        .assert()
        .failure();
}

#[test]
fn test_unknown_workout_type_is_rejected() {
    let temp_dir = setup_test_dir();

    treino(temp_dir.path(), MONDAY)
        .args(["plan", "set", "2", "mandatory", "Yoga"])
        .assert()
        .failure();
}

#[test]
fn test_missed_workout_blocks_later_days() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    treino(data_dir, MONDAY)
        .args(["plan", "set", "1", "mandatory", "Peito"])
        .assert()
        .success();

    treino(data_dir, WEDNESDAY)
        .args(["plan", "set", "4", "cardio"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Monday's workout must be completed first",
        ));

    // The past, missed day itself is locked
    treino(data_dir, WEDNESDAY)
        .args(["plan", "set", "1", "rest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Past days"));
}

#[test]
fn test_review_applies_reallocation() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    // Later days first: an earlier pending workout would block them
    treino(data_dir, MONDAY)
        .args(["plan", "set", "3", "mandatory", "Costas"])
        .assert()
        .success();
    treino(data_dir, MONDAY)
        .args(["plan", "set", "1", "mandatory", "Peito"])
        .assert()
        .success();

    treino(data_dir, WEDNESDAY)
        .args(["plan", "review"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Move Peito from Monday to Thursday"));

    treino(data_dir, WEDNESDAY)
        .args(["plan", "review", "--apply"])
        .assert()
        .success();

    treino(data_dir, WEDNESDAY)
        .args(["plan", "review"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No missed workouts"));

    let output = treino(data_dir, WEDNESDAY)
        .args(["plan", "show"])
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let monday = stdout.lines().find(|l| l.contains("Monday")).unwrap();
    let thursday = stdout.lines().find(|l| l.contains("Thursday")).unwrap();
    assert!(monday.contains("rest"), "{}", stdout);
    assert!(thursday.contains("Peito (mandatory)"), "{}", stdout);
}

#[test]
fn test_workout_auto_complete_commits() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    run_peito(data_dir, &[])
        .success()
        .stdout(predicate::str::contains("Workout finished: 13 set(s)"))
        .stdout(predicate::str::contains("Synced"));

    assert_eq!(commit_log_lines(data_dir), 1);

    // The day is marked completed
    treino(data_dir, MONDAY)
        .args(["plan", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Peito (mandatory) ✓"));
}

#[test]
fn test_workout_uses_planned_type() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    treino(data_dir, MONDAY)
        .args(["plan", "set", "1", "mandatory", "Ombro"])
        .assert()
        .success();

    treino(data_dir, MONDAY)
        .args(["workout", "--auto-complete", "--no-rest"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ombro on Monday"))
        .stdout(predicate::str::contains("10 set(s)"));
}

#[test]
fn test_workout_without_plan_needs_type() {
    let temp_dir = setup_test_dir();

    treino(temp_dir.path(), MONDAY)
        .args(["workout", "--auto-complete", "--no-rest"])
        .assert()
        .failure();
}

#[test]
fn test_offline_workout_then_sync() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    run_peito(data_dir, &["--offline"])
        .success()
        .stdout(predicate::str::contains("Saved offline; 1 session(s) waiting"));
    assert_eq!(commit_log_lines(data_dir), 0);

    treino(data_dir, MONDAY)
        .args(["--offline", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending sessions: 1"));

    treino(data_dir, MONDAY)
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("Synced 1 session(s)"));
    assert_eq!(commit_log_lines(data_dir), 1);

    treino(data_dir, MONDAY)
        .args(["--offline", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pending sessions: 0"))
        .stdout(predicate::str::contains("Committed sessions: 1"));
}

#[test]
fn test_interrupted_session_requires_recovery_choice() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    run_peito(data_dir, &["--interrupt-after", "3"])
        .success()
        .stdout(predicate::str::contains("interrupted after 3 set(s)"));

    // Without a choice the next workout refuses to start
    run_peito(data_dir, &[])
        .failure()
        .stdout(predicate::str::contains("3 unsent set(s)"));
    assert_eq!(commit_log_lines(data_dir), 0);

    run_peito(data_dir, &["--recover"])
        .success()
        .stdout(predicate::str::contains("Recovered 3 set(s)"))
        .stdout(predicate::str::contains("Workout finished: 13 set(s)"));

    let log = fs::read_to_string(data_dir.join("remote/executions.jsonl")).unwrap();
    let session: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
    assert_eq!(session["records"].as_array().unwrap().len(), 13);
}

#[test]
fn test_interrupted_session_can_be_discarded() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    run_peito(data_dir, &["--interrupt-after", "2"]).success();

    run_peito(data_dir, &["--discard"])
        .success()
        .stdout(predicate::str::contains("Workout finished: 13 set(s)"));

    treino(data_dir, MONDAY)
        .args(["--offline", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Unfinished session: none"));
}

#[test]
fn test_export_writes_csv() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path();

    treino(data_dir, MONDAY)
        .arg("export")
        .assert()
        .success()
        .stdout(predicate::str::contains("nothing to export"));

    run_peito(data_dir, &[]).success();

    treino(data_dir, MONDAY)
        .arg("export")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 13 set(s)"));

    let csv = fs::read_to_string(data_dir.join("executions.csv")).unwrap();
    assert!(csv.starts_with("session_id,"));
    assert_eq!(csv.lines().count(), 14);
}
