//! Durable queue of finished sessions awaiting remote commit.
//!
//! The queue is a JSON array under [`QUEUE_KEY`]. An entry leaves it only
//! once the sink has acknowledged the commit, so it survives restarts and any
//! number of failed attempts. Entries that keep failing are moved to a
//! parked lane under [`PARKED_KEY`]; they are kept there until requeued.
//!
//! Every read-modify-write of either lane holds the store lock named after
//! [`QUEUE_KEY`]. A flush commits from a snapshot without the lock and merges
//! its outcome into the lanes as they are at the end, so sessions enqueued
//! meanwhile by another handle or process survive.

use crate::config::SyncConfig;
use crate::plan::{mark_day_completed, PlanStore};
use crate::sink::{CommitRequest, RemoteExecutionSink};
use crate::storage::{self, KeyValueStore};
use crate::types::{PendingSession, WorkoutSession};
use crate::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Storage key of the retry queue
pub const QUEUE_KEY: &str = "sync_queue";
/// Storage key of entries that exhausted their attempts
pub const PARKED_KEY: &str = "sync_parked";

/// Whether a flush honors each entry's backoff window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushMode {
    /// Skip entries whose next attempt is still in the future
    Scheduled,
    /// Try every entry now (app start with connectivity, explicit sync)
    Forced,
}

/// What a flush did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Sessions acknowledged by the sink, in queue order
    pub committed: Vec<Uuid>,
    /// Failed attempts that stay queued
    pub failed: usize,
    /// Entries skipped because their backoff has not elapsed
    pub deferred: usize,
    /// Entries moved to the parked lane during this flush
    pub parked: usize,
    /// Entries still queued afterwards
    pub remaining: usize,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.parked == 0
    }
}

/// Delay before attempt `attempts + 1`: exponential from the base delay,
/// capped, plus up to `jitter_ratio` of random extra
pub fn backoff_delay(config: &SyncConfig, attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(32);
    let secs = config
        .base_retry_delay_secs
        .saturating_mul(1u64 << exponent)
        .min(config.max_retry_delay_secs);
    let delay = Duration::from_secs(secs);

    if config.jitter_ratio > 0.0 && secs > 0 {
        let extra = rand::thread_rng().gen_range(0.0..=config.jitter_ratio);
        delay + delay.mul_f64(extra)
    } else {
        delay
    }
}

pub struct SyncQueue {
    store: Arc<dyn KeyValueStore>,
    config: SyncConfig,
}

impl SyncQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, config: SyncConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Entries waiting for a commit, oldest first
    pub fn pending(&self) -> Result<Vec<PendingSession>> {
        Ok(storage::load(self.store.as_ref(), QUEUE_KEY)?.unwrap_or_default())
    }

    /// Entries that exhausted `max_attempts`
    pub fn parked(&self) -> Result<Vec<PendingSession>> {
        Ok(storage::load(self.store.as_ref(), PARKED_KEY)?.unwrap_or_default())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn save_lane(&self, key: &str, entries: &[PendingSession]) -> Result<()> {
        if entries.is_empty() {
            self.store.remove(key)
        } else {
            storage::save(self.store.as_ref(), key, &entries)
        }
    }

    /// Durably append a finished session. Returns false when the session is
    /// already queued or parked.
    pub fn enqueue(&self, session: WorkoutSession, now: DateTime<Utc>) -> Result<bool> {
        let _lock = self.store.lock(QUEUE_KEY)?;
        let mut queue = self.pending()?;
        let id = session.session_id;
        if queue.iter().any(|p| p.session_id() == id)
            || self.parked()?.iter().any(|p| p.session_id() == id)
        {
            tracing::debug!("Session {} is already queued", id);
            return Ok(false);
        }

        let records = session.records.len();
        queue.push(PendingSession::new(session, now));
        self.save_lane(QUEUE_KEY, &queue)?;
        tracing::info!(
            "Queued session {} ({} records, {} pending)",
            id,
            records,
            queue.len()
        );
        Ok(true)
    }

    /// Attempt every due entry. Acknowledged entries are removed and, when a
    /// plan store is given, their day is marked completed.
    pub fn flush_all(
        &self,
        sink: &dyn RemoteExecutionSink,
        plans: Option<&dyn PlanStore>,
        now: DateTime<Utc>,
    ) -> Result<FlushReport> {
        self.flush(sink, plans, now, FlushMode::Scheduled)
    }

    /// Connectivity came back: retry everything regardless of backoff
    pub fn on_online(
        &self,
        sink: &dyn RemoteExecutionSink,
        plans: Option<&dyn PlanStore>,
        now: DateTime<Utc>,
    ) -> Result<FlushReport> {
        tracing::info!("Connectivity restored, flushing sync queue");
        self.flush(sink, plans, now, FlushMode::Forced)
    }

    pub fn flush(
        &self,
        sink: &dyn RemoteExecutionSink,
        plans: Option<&dyn PlanStore>,
        now: DateTime<Utc>,
        mode: FlushMode,
    ) -> Result<FlushReport> {
        let queue = self.pending()?;
        let mut report = FlushReport::default();
        if queue.is_empty() {
            return Ok(report);
        }

        let mut retried: HashMap<Uuid, PendingSession> = HashMap::new();
        let mut newly_parked = Vec::new();

        for mut entry in queue {
            if mode == FlushMode::Scheduled && !entry.is_due(now) {
                report.deferred += 1;
                continue;
            }

            let request = CommitRequest::from_session(&entry.session, self.config.commit_timeout());
            match sink.commit_session(&request) {
                Ok(ack) => {
                    tracing::info!(
                        "Session {} committed ({} records inserted{})",
                        ack.session_id,
                        ack.inserted,
                        if ack.duplicate { ", duplicate" } else { "" }
                    );
                    report.committed.push(ack.session_id);
                    if let Some(plans) = plans {
                        mark_session_day(plans, &entry.session);
                    }
                }
                Err(e) => {
                    entry.attempts += 1;
                    entry.last_attempt_at = Some(now);
                    entry.last_error = Some(e.to_string());

                    if entry.attempts >= self.config.max_attempts {
                        tracing::warn!(
                            "Session {} failed {} times, parking it: {}",
                            entry.session_id(),
                            entry.attempts,
                            e
                        );
                        entry.next_attempt_at = None;
                        newly_parked.push(entry);
                    } else {
                        let delay = backoff_delay(&self.config, entry.attempts);
                        entry.next_attempt_at = Some(
                            now + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::zero()),
                        );
                        tracing::warn!(
                            "Commit of session {} failed (attempt {}), retrying in {:?}: {}",
                            entry.session_id(),
                            entry.attempts,
                            delay,
                            e
                        );
                        report.failed += 1;
                        retried.insert(entry.session_id(), entry);
                    }
                }
            }
        }

        let _lock = self.store.lock(QUEUE_KEY)?;
        let current = self.pending()?;
        let present: HashSet<Uuid> = current.iter().map(|p| p.session_id()).collect();
        let committed: HashSet<Uuid> = report.committed.iter().copied().collect();

        // Parked lane first: a crash in between leaves the entry in both
        // lanes, never in neither. Entries another flush already committed
        // are not parked.
        let mut parked_ids = HashSet::new();
        newly_parked.retain(|p| present.contains(&p.session_id()));
        if !newly_parked.is_empty() {
            let mut parked = self.parked()?;
            for entry in newly_parked {
                parked_ids.insert(entry.session_id());
                if !parked.iter().any(|p| p.session_id() == entry.session_id()) {
                    parked.push(entry);
                }
            }
            report.parked = parked_ids.len();
            self.save_lane(PARKED_KEY, &parked)?;
        }

        let keep: Vec<PendingSession> = current
            .into_iter()
            .filter(|p| !committed.contains(&p.session_id()) && !parked_ids.contains(&p.session_id()))
            .map(|p| retried.remove(&p.session_id()).unwrap_or(p))
            .collect();
        self.save_lane(QUEUE_KEY, &keep)?;

        report.remaining = keep.len();
        tracing::debug!("Flush finished: {:?}", report);
        Ok(report)
    }

    /// Move parked entries back into the queue with a fresh attempt budget
    pub fn requeue_parked(&self, now: DateTime<Utc>) -> Result<usize> {
        let _lock = self.store.lock(QUEUE_KEY)?;
        let parked = self.parked()?;
        if parked.is_empty() {
            return Ok(0);
        }

        let mut queue = self.pending()?;
        let mut moved = 0;
        for mut entry in parked {
            if queue.iter().any(|p| p.session_id() == entry.session_id()) {
                continue;
            }
            entry.attempts = 0;
            entry.next_attempt_at = None;
            entry.enqueued_at = now;
            queue.push(entry);
            moved += 1;
        }

        self.save_lane(QUEUE_KEY, &queue)?;
        self.store.remove(PARKED_KEY)?;
        tracing::info!("Requeued {} parked session(s)", moved);
        Ok(moved)
    }
}

/// Best effort; the commit already succeeded
fn mark_session_day(plans: &dyn PlanStore, session: &WorkoutSession) {
    let at = session.finished_at.unwrap_or_else(Utc::now);
    if let Err(e) = mark_day_completed(
        plans,
        &session.plan_key(),
        session.day_index,
        &session.workout_type_id,
        at,
    ) {
        tracing::warn!(
            "Unable to mark day {} of {} as completed: {}",
            session.day_index,
            session.plan_key(),
            e
        );
    }
}
