//! CSV export of committed executions.
//!
//! The commit log stays the source of truth; the CSV is regenerated from it
//! on every export and replaced atomically.

use crate::sink::{read_commits, CommittedSession};
use crate::types::ExecutionRecord;
use crate::{Error, Result};
use std::path::Path;
use tempfile::NamedTempFile;

/// A row in the CSV output, one per confirmed set
#[derive(Debug, serde::Serialize)]
struct CsvRow<'a> {
    session_id: String,
    user_id: &'a str,
    year: i32,
    week: u32,
    day_index: u8,
    workout_type_id: &'a str,
    record_id: String,
    exercise_id: &'a str,
    set_index: u32,
    weight: f64,
    reps: u32,
    captured_at: String,
    pre_rating: Option<u8>,
    post_rating: Option<u8>,
}

impl<'a> CsvRow<'a> {
    fn new(session: &'a CommittedSession, record: &'a ExecutionRecord) -> Self {
        CsvRow {
            session_id: session.session_id.to_string(),
            user_id: &session.user_id,
            year: session.year,
            week: session.week,
            day_index: session.day_index,
            workout_type_id: &session.workout_type_id,
            record_id: record.record_id.to_string(),
            exercise_id: &record.exercise_id,
            set_index: record.set_index,
            weight: record.weight,
            reps: record.reps,
            captured_at: record.captured_at.to_rfc3339(),
            pre_rating: session.ratings.pre,
            post_rating: session.ratings.post,
        }
    }
}

/// Write every committed record to `csv_path`, replacing any previous export.
///
/// Returns the number of rows written.
pub fn export_records_csv(log_path: &Path, csv_path: &Path) -> Result<usize> {
    let sessions = read_commits(log_path)?;

    let dir = match csv_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let temp = NamedTempFile::new_in(dir)?;
    let mut writer = csv::Writer::from_writer(temp.as_file());

    let mut rows = 0;
    for session in &sessions {
        for record in &session.records {
            writer.serialize(CsvRow::new(session, record))?;
            rows += 1;
        }
    }
    writer.flush()?;
    drop(writer);

    temp.as_file().sync_all()?;
    temp.persist(csv_path).map_err(|e| Error::Io(e.error))?;

    tracing::info!(
        "Exported {} record(s) from {} session(s) to {:?}",
        rows,
        sessions.len(),
        csv_path
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{CommitRequest, JsonlCommitLog, RemoteExecutionSink};
    use crate::types::SessionRatings;
    use std::time::Duration;
    use uuid::Uuid;

    fn commit(log: &JsonlCommitLog, sets: u32) {
        let request = CommitRequest {
            session_id: Uuid::new_v4(),
            user_id: "u1".into(),
            year: 2024,
            week: 3,
            day_index: 2,
            workout_type_id: "Costas".into(),
            records: (1..=sets)
                .map(|i| ExecutionRecord::new("remada_curvada", i, 50.0, 8))
                .collect(),
            ratings: SessionRatings {
                pre: Some(3),
                post: None,
            },
            timeout: Duration::from_secs(1),
        };
        log.commit_session(&request).unwrap();
    }

    #[test]
    fn test_export_writes_one_row_per_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = JsonlCommitLog::new(temp_dir.path());
        commit(&log, 3);
        commit(&log, 2);

        let csv_path = temp_dir.path().join("out").join("executions.csv");
        let rows = export_records_csv(&log.log_path(), &csv_path).unwrap();
        assert_eq!(rows, 5);

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "session_id");
        assert_eq!(reader.records().count(), 5);
    }

    #[test]
    fn test_export_replaces_previous_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let log = JsonlCommitLog::new(temp_dir.path());
        let csv_path = temp_dir.path().join("executions.csv");

        commit(&log, 1);
        export_records_csv(&log.log_path(), &csv_path).unwrap();
        commit(&log, 1);
        let rows = export_records_csv(&log.log_path(), &csv_path).unwrap();
        assert_eq!(rows, 2);

        let contents = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(contents.lines().count(), 3); // header + 2 rows
    }

    #[test]
    fn test_export_without_log() {
        let temp_dir = tempfile::tempdir().unwrap();
        let csv_path = temp_dir.path().join("executions.csv");
        let rows = export_records_csv(&temp_dir.path().join("missing.jsonl"), &csv_path).unwrap();
        assert_eq!(rows, 0);
        assert!(csv_path.exists());
    }
}
