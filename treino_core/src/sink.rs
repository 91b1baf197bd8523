//! Remote commit of finished sessions.
//!
//! [`RemoteExecutionSink`] is the seam to the hosted store. [`JsonlCommitLog`]
//! is the reference implementation: committed sessions are appended to a
//! JSONL (JSON Lines) file with file locking, one line per session, so a
//! session is either fully committed or not at all.

use crate::storage::{self, FileStore};
use crate::types::{ExecutionRecord, PlanKey, SessionRatings, WorkoutSession};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One session's batch, as sent to the remote store
#[derive(Clone, Debug)]
pub struct CommitRequest {
    pub session_id: Uuid,
    pub user_id: String,
    pub year: i32,
    pub week: u32,
    pub day_index: u8,
    pub workout_type_id: String,
    pub records: Vec<ExecutionRecord>,
    pub ratings: SessionRatings,
    /// Upper bound the sink must respect for this call
    pub timeout: Duration,
}

impl CommitRequest {
    pub fn from_session(session: &WorkoutSession, timeout: Duration) -> Self {
        Self {
            session_id: session.session_id,
            user_id: session.user_id.clone(),
            year: session.year,
            week: session.week,
            day_index: session.day_index,
            workout_type_id: session.workout_type_id.clone(),
            records: session.records.clone(),
            ratings: session.ratings,
            timeout,
        }
    }

    pub fn plan_key(&self) -> PlanKey {
        PlanKey::new(self.user_id.clone(), self.year, self.week)
    }
}

/// Acknowledgement of a commit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitAck {
    pub session_id: Uuid,
    /// Records actually written by this call
    pub inserted: usize,
    /// The session had already been committed earlier
    pub duplicate: bool,
}

/// Remote side of the sync queue
pub trait RemoteExecutionSink: Send + Sync {
    /// Insert the batch tagged with its session id and upsert the week's
    /// ratings. Must be idempotent per `session_id` and per record id.
    fn commit_session(&self, request: &CommitRequest) -> Result<CommitAck>;
}

/// A sink with no connectivity; every commit fails
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineSink;

impl RemoteExecutionSink for OfflineSink {
    fn commit_session(&self, request: &CommitRequest) -> Result<CommitAck> {
        Err(Error::Remote(format!(
            "offline, session {} not sent",
            request.session_id
        )))
    }
}

/// A committed session as stored in the commit log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommittedSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub year: i32,
    pub week: u32,
    pub day_index: u8,
    pub workout_type_id: String,
    pub records: Vec<ExecutionRecord>,
    #[serde(default)]
    pub ratings: SessionRatings,
    pub committed_at: DateTime<Utc>,
}

/// Ratings document, upserted per (user, year, week)
#[derive(Clone, Debug, Serialize, Deserialize)]
struct RatingsEntry {
    session_id: Uuid,
    pre: Option<u8>,
    post: Option<u8>,
    updated_at: DateTime<Utc>,
}

/// Local commit log standing in for the hosted database
pub struct JsonlCommitLog {
    dir: PathBuf,
    ratings: FileStore,
}

impl JsonlCommitLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let ratings = FileStore::new(dir.join("ratings"));
        Self { dir, ratings }
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join("executions.jsonl")
    }

    /// Ratings stored for a week, if any
    pub fn ratings_for(&self, key: &PlanKey) -> Result<Option<SessionRatings>> {
        let entry: Option<RatingsEntry> = storage::load(&self.ratings, &key.to_string())?;
        Ok(entry.map(|e| SessionRatings {
            pre: e.pre,
            post: e.post,
        }))
    }

    fn upsert_ratings(&self, request: &CommitRequest) -> Result<()> {
        if request.ratings.is_empty() {
            return Ok(());
        }
        let entry = RatingsEntry {
            session_id: request.session_id,
            pre: request.ratings.pre,
            post: request.ratings.post,
            updated_at: Utc::now(),
        };
        storage::save(&self.ratings, &request.plan_key().to_string(), &entry)
    }
}

/// Poll for an exclusive lock until `timeout` runs out
fn lock_with_timeout(file: &File, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                if Instant::now() >= deadline {
                    return Err(Error::Remote(format!(
                        "timed out after {:?} waiting for the commit log",
                        timeout
                    )));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(e.into()),
        }
    }
}

impl RemoteExecutionSink for JsonlCommitLog {
    fn commit_session(&self, request: &CommitRequest) -> Result<CommitAck> {
        std::fs::create_dir_all(&self.dir)?;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.log_path())?;
        lock_with_timeout(&file, request.timeout)?;

        let result = self.append_unique(&file, request);
        file.unlock()?;
        result
    }
}

impl JsonlCommitLog {
    /// Append the request unless its session (or any of its records) is
    /// known. Runs under the exclusive log lock.
    fn append_unique(&self, file: &File, request: &CommitRequest) -> Result<CommitAck> {
        let mut seen_records = HashSet::new();
        for session in parse_lines(BufReader::new(file)) {
            if session.session_id == request.session_id {
                tracing::debug!("Session {} already committed", request.session_id);
                return Ok(CommitAck {
                    session_id: request.session_id,
                    inserted: 0,
                    duplicate: true,
                });
            }
            seen_records.extend(session.records.iter().map(|r| r.record_id));
        }

        let records: Vec<ExecutionRecord> = request
            .records
            .iter()
            .filter(|r| !seen_records.contains(&r.record_id))
            .cloned()
            .collect();
        let skipped = request.records.len() - records.len();
        if skipped > 0 {
            tracing::info!(
                "Skipping {} record(s) of session {} committed earlier",
                skipped,
                request.session_id
            );
        }

        // Before the log line: a retry after a failed upsert is not a duplicate yet
        self.upsert_ratings(request)?;

        let committed = CommittedSession {
            session_id: request.session_id,
            user_id: request.user_id.clone(),
            year: request.year,
            week: request.week,
            day_index: request.day_index,
            workout_type_id: request.workout_type_id.clone(),
            records,
            ratings: request.ratings,
            committed_at: Utc::now(),
        };

        terminate_torn_line(file)?;

        let mut writer = std::io::BufWriter::new(file);
        let line = serde_json::to_string(&committed)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        tracing::debug!(
            "Committed session {} ({} records)",
            committed.session_id,
            committed.records.len()
        );
        Ok(CommitAck {
            session_id: committed.session_id,
            inserted: committed.records.len(),
            duplicate: false,
        })
    }
}

/// Close a line left unterminated by an interrupted append, so the next
/// line starts on its own
fn terminate_torn_line(file: &File) -> Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }

    let mut reader = file;
    reader.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    reader.read_exact(&mut last)?;
    if last[0] != b'\n' {
        tracing::warn!("Commit log ends in a partial line, terminating it");
        let mut writer = file;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

fn parse_lines<R: BufRead>(reader: R) -> Vec<CommittedSession> {
    let mut sessions = Vec::new();
    for (line_num, line_result) in reader.lines().enumerate() {
        let line = match line_result {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to read commit log line {}: {}", line_num + 1, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CommittedSession>(&line) {
            Ok(session) => sessions.push(session),
            Err(e) => {
                tracing::warn!("Failed to parse commit at line {}: {}", line_num + 1, e);
            }
        }
    }
    sessions
}

/// Read all committed sessions from a commit log
pub fn read_commits(path: &Path) -> Result<Vec<CommittedSession>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;
    let sessions = parse_lines(BufReader::new(&file));
    file.unlock()?;

    tracing::debug!("Read {} committed sessions", sessions.len());
    Ok(sessions)
}
