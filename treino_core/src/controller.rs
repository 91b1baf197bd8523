//! Workout session lifecycle.
//!
//! ```text
//! Idle -> Active(exercise, series) <-> Resting(next, remaining) -> ... -> Completed -> Flushing -> Idle
//! ```
//!
//! The controller owns the active [`WorkoutSession`] and drives the
//! [`ExecutionBuffer`], the [`SyncQueue`] and the plan store. It has no
//! notion of a screen or a timer; callers feed it confirmed sets and a 1 Hz
//! `tick()`.

use crate::buffer::{validate_set, ExecutionBuffer, SetValidationError};
use crate::config::SessionConfig;
use crate::plan::{mark_day_completed, PlanStore};
use crate::sink::{CommitRequest, RemoteExecutionSink};
use crate::sync::{FlushMode, FlushReport, SyncQueue};
use crate::types::{
    check_day, day_name, ExecutionRecord, ExerciseTarget, PlanKey, SessionRatings,
    WorkoutSession, WorkoutTemplate,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Where the controller stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active {
        exercise_index: usize,
        completed_series: u32,
    },
    Resting {
        next_exercise_index: usize,
        remaining_seconds: u32,
    },
    /// All series done, waiting for `finish()`
    Completed,
    /// Handing the session over to the sync queue
    Flushing,
}

/// The workout to run and the day it counts for
#[derive(Clone, Debug)]
pub struct SessionPlan {
    pub day_index: u8,
    pub workout: WorkoutTemplate,
}

/// Decision about records left behind by an earlier session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryChoice {
    /// Merge the leftover records into the new session
    Recover,
    /// Throw them away
    Discard,
}

/// Details shown to the user before they pick a [`RecoveryChoice`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecoveryPrompt {
    pub session_id: Uuid,
    pub workout_type_id: String,
    pub day_index: u8,
    pub records: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StartOutcome {
    Started {
        session_id: Uuid,
        /// Records carried over from the previous session
        recovered: usize,
        /// False when the buffer could not be written to durable storage
        offline_protection: bool,
    },
    /// Leftover records exist; call `start` again with a choice
    RecoveryRequired(RecoveryPrompt),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SetOutcome {
    /// Invalid input; nothing changed
    Rejected(SetValidationError),
    Recorded {
        exercise_id: String,
        set_index: u32,
        persisted: bool,
    },
    RestStarted {
        next_exercise_index: usize,
        rest_seconds: u32,
        persisted: bool,
    },
    WorkoutCompleted {
        persisted: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    NotResting,
    Resting { remaining_seconds: u32 },
    /// The countdown ran out and the next exercise is active
    RestOver { exercise_index: usize },
}

/// What `finish()` did with the session
#[derive(Clone, Debug)]
pub struct FinishReport {
    pub session_id: Uuid,
    pub records: usize,
    /// Durably accepted by the sync queue
    pub queued: bool,
    /// Queue unavailable; the sink accepted the session directly
    pub committed_directly: bool,
    pub plan_marked: bool,
    /// Outcome of the immediate flush attempt, if one ran
    pub flush: Option<FlushReport>,
}

/// Proof that abandoning was requested for a specific session
#[derive(Debug)]
pub struct AbandonTicket {
    session_id: Uuid,
}

impl AbandonTicket {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

pub struct WorkoutSessionController {
    key: PlanKey,
    buffer: ExecutionBuffer,
    queue: SyncQueue,
    plans: Arc<dyn PlanStore>,
    sink: Arc<dyn RemoteExecutionSink>,
    settings: SessionConfig,
    state: SessionState,
    session: Option<WorkoutSession>,
}

impl WorkoutSessionController {
    pub fn new(
        key: PlanKey,
        buffer: ExecutionBuffer,
        queue: SyncQueue,
        plans: Arc<dyn PlanStore>,
        sink: Arc<dyn RemoteExecutionSink>,
        settings: SessionConfig,
    ) -> Self {
        Self {
            key,
            buffer,
            queue,
            plans,
            sink,
            settings,
            state: SessionState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether leaving the workout screen needs confirmation
    pub fn is_active(&self) -> bool {
        self.state != SessionState::Idle
    }

    pub fn session(&self) -> Option<&WorkoutSession> {
        self.session.as_ref()
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// Records confirmed so far in the active session
    pub fn records(&self) -> &[ExecutionRecord] {
        self.buffer.records()
    }

    pub fn offline_protection(&self) -> bool {
        self.buffer.is_durable()
    }

    /// Exercise being performed, or the one coming up after a rest
    pub fn current_exercise(&self) -> Option<&ExerciseTarget> {
        let index = match self.state {
            SessionState::Active { exercise_index, .. } => exercise_index,
            SessionState::Resting {
                next_exercise_index,
                ..
            } => next_exercise_index,
            _ => return None,
        };
        self.session.as_ref()?.exercises.get(index)
    }

    pub fn start(
        &mut self,
        plan: SessionPlan,
        recovery: Option<RecoveryChoice>,
    ) -> Result<StartOutcome> {
        if self.state != SessionState::Idle {
            return Err(Error::SessionActive);
        }
        check_day(plan.day_index)?;
        if plan.workout.exercises.is_empty() {
            return Err(Error::InvalidState(format!(
                "workout '{}' has no exercises",
                plan.workout.workout_type_id
            )));
        }

        let recovered = match recovery {
            Some(RecoveryChoice::Discard) => {
                self.buffer.discard_leftover()?;
                Vec::new()
            }
            Some(RecoveryChoice::Recover) => self
                .buffer
                .leftover()?
                .map(|snapshot| snapshot.records)
                .unwrap_or_default(),
            None => {
                if let Some(snapshot) = self.buffer.leftover()? {
                    tracing::info!(
                        "Found {} unsent record(s) from session {}",
                        snapshot.records.len(),
                        snapshot.session_id
                    );
                    return Ok(StartOutcome::RecoveryRequired(RecoveryPrompt {
                        session_id: snapshot.session_id,
                        workout_type_id: snapshot.workout_type_id,
                        day_index: snapshot.day_index,
                        records: snapshot.records.len(),
                        started_at: snapshot.started_at,
                    }));
                }
                Vec::new()
            }
        };

        let now = Utc::now();
        let session = WorkoutSession {
            session_id: Uuid::new_v4(),
            user_id: self.key.user_id.clone(),
            year: self.key.year,
            week: self.key.week,
            day_index: plan.day_index,
            workout_type_id: plan.workout.workout_type_id.clone(),
            exercises: plan.workout.exercises,
            records: Vec::new(),
            ratings: SessionRatings::default(),
            started_at: now,
            finished_at: None,
        };

        let recovered_count = recovered.len();
        self.state = resume_position(&session.exercises, &recovered);
        let outcome = self.buffer.begin(
            session.session_id,
            &session.workout_type_id,
            session.day_index,
            now,
            recovered,
        );

        tracing::info!(
            "Started {} on {} (session {}, {} recovered record(s))",
            session.workout_type_id,
            day_name(session.day_index),
            session.session_id,
            recovered_count
        );
        let session_id = session.session_id;
        self.session = Some(session);

        Ok(StartOutcome::Started {
            session_id,
            recovered: recovered_count,
            offline_protection: outcome.persisted,
        })
    }

    pub fn confirm_set(&mut self, weight: f64, reps: u32) -> Result<SetOutcome> {
        let (exercise_index, completed_series) = match self.state {
            SessionState::Active {
                exercise_index,
                completed_series,
            } => (exercise_index, completed_series),
            SessionState::Idle => return Err(Error::NoActiveSession),
            other => {
                return Err(Error::InvalidState(format!(
                    "cannot record a set while {:?}",
                    other
                )))
            }
        };
        if let Err(e) = validate_set(weight, reps) {
            return Ok(SetOutcome::Rejected(e));
        }

        let session = self.session.as_ref().ok_or(Error::NoActiveSession)?;
        let exercise = session
            .exercises
            .get(exercise_index)
            .ok_or_else(|| Error::InvalidState(format!("no exercise at {}", exercise_index)))?;
        let exercise_count = session.exercises.len();
        let exercise_id = exercise.exercise_id.clone();
        let series = exercise.series;
        let rest = exercise.rest_seconds;

        let set_index = completed_series + 1;
        let record = ExecutionRecord::new(exercise_id.clone(), set_index, weight, reps);
        let persisted = match self.buffer.record_set(record) {
            Ok(outcome) => outcome.persisted,
            Err(e) => return Ok(SetOutcome::Rejected(e)),
        };
        tracing::debug!(
            "Set {}/{} of {} recorded ({} x {})",
            set_index,
            series,
            exercise_id,
            weight,
            reps
        );

        if set_index < series {
            self.state = SessionState::Active {
                exercise_index,
                completed_series: set_index,
            };
            return Ok(SetOutcome::Recorded {
                exercise_id,
                set_index,
                persisted,
            });
        }

        let next = exercise_index + 1;
        if next < exercise_count {
            let rest_seconds = if rest == 0 {
                self.settings.default_rest_seconds
            } else {
                rest
            };
            self.state = SessionState::Resting {
                next_exercise_index: next,
                remaining_seconds: rest_seconds,
            };
            tracing::info!("{} done, resting {}s", exercise_id, rest_seconds);
            Ok(SetOutcome::RestStarted {
                next_exercise_index: next,
                rest_seconds,
                persisted,
            })
        } else {
            self.state = SessionState::Completed;
            tracing::info!("All exercises completed");
            Ok(SetOutcome::WorkoutCompleted { persisted })
        }
    }

    /// Advance the rest countdown by one second
    pub fn tick(&mut self) -> TickOutcome {
        match self.state {
            SessionState::Resting {
                next_exercise_index,
                remaining_seconds,
            } => {
                let remaining = remaining_seconds.saturating_sub(1);
                if remaining == 0 {
                    self.state = SessionState::Active {
                        exercise_index: next_exercise_index,
                        completed_series: 0,
                    };
                    TickOutcome::RestOver {
                        exercise_index: next_exercise_index,
                    }
                } else {
                    self.state = SessionState::Resting {
                        next_exercise_index,
                        remaining_seconds: remaining,
                    };
                    TickOutcome::Resting {
                        remaining_seconds: remaining,
                    }
                }
            }
            _ => TickOutcome::NotResting,
        }
    }

    /// End the rest early; returns the exercise now active
    pub fn skip_rest(&mut self) -> Result<usize> {
        match self.state {
            SessionState::Resting {
                next_exercise_index,
                ..
            } => {
                self.state = SessionState::Active {
                    exercise_index: next_exercise_index,
                    completed_series: 0,
                };
                Ok(next_exercise_index)
            }
            other => Err(Error::InvalidState(format!("not resting ({:?})", other))),
        }
    }

    /// Attach readiness ratings (0-5) to the session
    pub fn set_ratings(&mut self, pre: Option<u8>, post: Option<u8>) -> Result<()> {
        for rating in [pre, post].into_iter().flatten() {
            if rating > SessionRatings::MAX {
                return Err(Error::InvalidRating(rating));
            }
        }
        let session = self.session.as_mut().ok_or(Error::NoActiveSession)?;
        if pre.is_some() {
            session.ratings.pre = pre;
        }
        if post.is_some() {
            session.ratings.post = post;
        }
        Ok(())
    }

    /// Hand the completed session to the sync queue and return to `Idle`.
    ///
    /// Only a session that reached neither the queue nor the sink makes this
    /// fail; the controller then stays `Completed` with the buffer intact.
    pub fn finish(&mut self) -> Result<FinishReport> {
        if self.state != SessionState::Completed {
            return Err(Error::InvalidState(format!(
                "finish requires a completed workout ({:?})",
                self.state
            )));
        }
        let mut session = self.session.clone().ok_or(Error::NoActiveSession)?;
        let now = Utc::now();
        session.records = self.buffer.records().to_vec();
        session.finished_at = Some(now);
        self.state = SessionState::Flushing;

        let mut report = FinishReport {
            session_id: session.session_id,
            records: session.records.len(),
            queued: false,
            committed_directly: false,
            plan_marked: false,
            flush: None,
        };

        match self.queue.enqueue(session.clone(), now) {
            Ok(_) => report.queued = true,
            Err(queue_err) => {
                tracing::warn!(
                    "Unable to queue session {}: {}. Trying a direct commit.",
                    session.session_id,
                    queue_err
                );
                let request =
                    CommitRequest::from_session(&session, self.queue.config().commit_timeout());
                match self.sink.commit_session(&request) {
                    Ok(_) => report.committed_directly = true,
                    Err(e) => {
                        tracing::warn!("Direct commit failed too: {}", e);
                        self.state = SessionState::Completed;
                        return Err(queue_err);
                    }
                }
            }
        }

        if let Err(e) = self.buffer.clear() {
            tracing::warn!("Unable to clear execution buffer: {}", e);
        }

        match mark_day_completed(
            self.plans.as_ref(),
            &self.key,
            session.day_index,
            &session.workout_type_id,
            now,
        ) {
            Ok(changed) => report.plan_marked = changed,
            Err(e) => tracing::warn!("Unable to mark {} completed: {}", day_name(session.day_index), e),
        }

        if report.queued {
            match self
                .queue
                .flush_all(self.sink.as_ref(), Some(self.plans.as_ref()), now)
            {
                Ok(flush) => report.flush = Some(flush),
                Err(e) => tracing::warn!("Flush after finish failed: {}", e),
            }
        }

        tracing::info!(
            "Finished session {} with {} record(s)",
            report.session_id,
            report.records
        );
        self.session = None;
        self.state = SessionState::Idle;
        Ok(report)
    }

    /// First step of abandoning; nothing is discarded yet
    pub fn request_abandon(&self) -> Result<AbandonTicket> {
        match (&self.state, &self.session) {
            (SessionState::Idle, _) | (_, None) => Err(Error::NoActiveSession),
            (_, Some(session)) => Ok(AbandonTicket {
                session_id: session.session_id,
            }),
        }
    }

    /// Discard the session the ticket was issued for. Returns how many
    /// records were thrown away.
    pub fn confirm_abandon(&mut self, ticket: AbandonTicket) -> Result<usize> {
        let current = self.session.as_ref().map(|s| s.session_id);
        if current != Some(ticket.session_id) {
            return Err(Error::InvalidState(
                "abandon ticket does not match the active session".into(),
            ));
        }

        let discarded = self.buffer.len();
        self.buffer.clear()?;
        self.session = None;
        self.state = SessionState::Idle;
        tracing::info!(
            "Abandoned session {} ({} record(s) discarded)",
            ticket.session_id,
            discarded
        );
        Ok(discarded)
    }

    /// Flush the queue now, ignoring backoff
    pub fn sync_now(&self) -> Result<FlushReport> {
        self.queue.flush(
            self.sink.as_ref(),
            Some(self.plans.as_ref()),
            Utc::now(),
            FlushMode::Forced,
        )
    }
}

/// State matching the recovered records: the first exercise whose series
/// are short of target, or `Completed` when none is
fn resume_position(exercises: &[ExerciseTarget], recovered: &[ExecutionRecord]) -> SessionState {
    for (index, exercise) in exercises.iter().enumerate() {
        let done = recovered
            .iter()
            .filter(|r| r.exercise_id == exercise.exercise_id)
            .count() as u32;
        if done < exercise.series {
            return SessionState::Active {
                exercise_index: index,
                completed_series: done,
            };
        }
    }
    SessionState::Completed
}
