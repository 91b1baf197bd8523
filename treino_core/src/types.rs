//! Core domain types for the treino system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Weekly plans and their day slots
//! - Workout templates (exercise ordering, series, rest)
//! - Execution records, sessions and pending sessions

use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Number of slots in a weekly plan
pub const DAYS_PER_WEEK: usize = 7;

/// Display names, indexed by day (0 = Sunday)
pub const DAY_NAMES: [&str; DAYS_PER_WEEK] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Day index (0 = Sunday .. 6 = Saturday) for a weekday
pub fn day_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

/// Name of a day index, or "?" when out of range
pub fn day_name(day: u8) -> &'static str {
    DAY_NAMES.get(day as usize).copied().unwrap_or("?")
}

/// Reject day indices outside 0..=6
pub fn check_day(day: u8) -> Result<()> {
    if (day as usize) < DAYS_PER_WEEK {
        Ok(())
    } else {
        Err(Error::InvalidDay(day))
    }
}

// ============================================================================
// Weekly Plan Types
// ============================================================================

/// Category of a planned day
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SlotCategory {
    Rest,
    Cardio,
    Mandatory,
}

impl fmt::Display for SlotCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlotCategory::Rest => "rest",
            SlotCategory::Cardio => "cardio",
            SlotCategory::Mandatory => "mandatory",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for SlotCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rest" => Ok(SlotCategory::Rest),
            "cardio" => Ok(SlotCategory::Cardio),
            "mandatory" | "workout" => Ok(SlotCategory::Mandatory),
            other => Err(Error::Other(format!("Unknown slot category: {}", other))),
        }
    }
}

/// One of the seven positions of a weekly plan
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DaySlot {
    pub workout_type_id: String,
    pub category: SlotCategory,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl DaySlot {
    pub fn mandatory(workout_type_id: impl Into<String>) -> Self {
        Self {
            workout_type_id: workout_type_id.into(),
            category: SlotCategory::Mandatory,
            completed: false,
            completed_at: None,
        }
    }

    pub fn rest() -> Self {
        Self {
            workout_type_id: "rest".into(),
            category: SlotCategory::Rest,
            completed: false,
            completed_at: None,
        }
    }

    pub fn cardio() -> Self {
        Self {
            workout_type_id: "cardio".into(),
            category: SlotCategory::Cardio,
            completed: false,
            completed_at: None,
        }
    }

    /// Build a slot from a category, using the category name as type for rest/cardio
    pub fn with_category(category: SlotCategory, workout_type_id: Option<&str>) -> Self {
        match category {
            SlotCategory::Rest => Self::rest(),
            SlotCategory::Cardio => Self::cardio(),
            SlotCategory::Mandatory => Self::mandatory(workout_type_id.unwrap_or_default()),
        }
    }

    /// Rest and cardio days can absorb a reallocated workout, unless they
    /// were already done
    pub fn is_open(&self) -> bool {
        !self.completed && matches!(self.category, SlotCategory::Rest | SlotCategory::Cardio)
    }

    pub fn is_pending_mandatory(&self) -> bool {
        self.category == SlotCategory::Mandatory && !self.completed
    }

    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.completed = true;
        self.completed_at = Some(at);
    }
}

/// The seven day slots of one user's week, indexed 0 (Sunday) to 6 (Saturday)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WeeklyPlan {
    pub days: [Option<DaySlot>; DAYS_PER_WEEK],
}

impl WeeklyPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for a day; `None` for empty slots and out-of-range indices
    pub fn slot(&self, day: u8) -> Option<&DaySlot> {
        self.days.get(day as usize).and_then(|s| s.as_ref())
    }

    pub fn slot_mut(&mut self, day: u8) -> Option<&mut DaySlot> {
        self.days.get_mut(day as usize).and_then(|s| s.as_mut())
    }

    /// Store a slot without invariant checks (use `assign` for guarded writes)
    pub fn set(&mut self, day: u8, slot: Option<DaySlot>) -> Result<()> {
        check_day(day)?;
        self.days[day as usize] = slot;
        Ok(())
    }

    /// Day holding the given mandatory workout type, ignoring `except`
    pub fn mandatory_day_of(&self, workout_type_id: &str, except: &[u8]) -> Option<u8> {
        self.days.iter().enumerate().find_map(|(day, slot)| {
            let day = day as u8;
            match slot {
                Some(s)
                    if s.category == SlotCategory::Mandatory
                        && s.workout_type_id == workout_type_id
                        && !except.contains(&day) =>
                {
                    Some(day)
                }
                _ => None,
            }
        })
    }

    /// Check that writing `slot` to `day` keeps every mandatory type unique.
    ///
    /// Days listed in `vacating` are about to be overwritten by the same
    /// operation and are ignored.
    pub fn check_assignment(&self, day: u8, slot: &DaySlot, vacating: &[u8]) -> Result<()> {
        check_day(day)?;
        if slot.category != SlotCategory::Mandatory {
            return Ok(());
        }
        if slot.workout_type_id.trim().is_empty() {
            return Err(Error::Other(
                "Mandatory slots need a workout type".into(),
            ));
        }

        let mut ignored = vacating.to_vec();
        ignored.push(day);
        match self.mandatory_day_of(&slot.workout_type_id, &ignored) {
            Some(existing) => Err(Error::DuplicateMandatory {
                workout_type_id: slot.workout_type_id.clone(),
                day: existing,
            }),
            None => Ok(()),
        }
    }

    /// Guarded write: checks uniqueness of mandatory types before storing
    pub fn assign(&mut self, day: u8, slot: DaySlot) -> Result<()> {
        self.check_assignment(day, &slot, &[])?;
        self.days[day as usize] = Some(slot);
        Ok(())
    }

    /// Indices of assigned days, ascending
    pub fn assigned_days(&self) -> impl Iterator<Item = (u8, &DaySlot)> {
        self.days
            .iter()
            .enumerate()
            .filter_map(|(day, slot)| slot.as_ref().map(|s| (day as u8, s)))
    }
}

/// Identifies one user's plan for one week
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub user_id: String,
    pub year: i32,
    pub week: u32,
}

impl PlanKey {
    pub fn new(user_id: impl Into<String>, year: i32, week: u32) -> Self {
        Self {
            user_id: user_id.into(),
            year,
            week,
        }
    }

    /// Key for the Sunday-started week containing `date`.
    ///
    /// Weeks are numbered after the ISO week of their Monday, so a Sunday
    /// belongs with the days that follow it.
    pub fn for_date(user_id: impl Into<String>, date: NaiveDate) -> Self {
        let sunday = date - Duration::days(date.weekday().num_days_from_sunday() as i64);
        let monday = sunday + Duration::days(1);
        let iso = monday.iso_week();
        Self::new(user_id, iso.year(), iso.week())
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-W{:02}", self.user_id, self.year, self.week)
    }
}

// ============================================================================
// Workout Templates
// ============================================================================

/// An exercise within a workout, with its prescribed volume
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseTarget {
    pub exercise_id: String,
    pub name: String,
    pub series: u32,
    pub target_reps: u32,
    /// Rest after the last series. 0 means unset: the session's
    /// `default_rest_seconds` applies.
    pub rest_seconds: u32,
}

/// The ordered exercises making up one mandatory workout type
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkoutTemplate {
    pub workout_type_id: String,
    pub name: String,
    pub exercises: Vec<ExerciseTarget>,
}

/// The catalog of known workout types
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub workouts: HashMap<String, WorkoutTemplate>,
}

// ============================================================================
// Session Types
// ============================================================================

/// One confirmed set. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    /// Per-record idempotency key
    pub record_id: Uuid,
    pub exercise_id: String,
    pub set_index: u32,
    pub weight: f64,
    pub reps: u32,
    pub captured_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(exercise_id: impl Into<String>, set_index: u32, weight: f64, reps: u32) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            exercise_id: exercise_id.into(),
            set_index,
            weight,
            reps,
            captured_at: Utc::now(),
        }
    }
}

/// Readiness ratings given before and after a workout (0-5)
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRatings {
    pub pre: Option<u8>,
    pub post: Option<u8>,
}

impl SessionRatings {
    pub const MAX: u8 = 5;

    pub fn is_empty(&self) -> bool {
        self.pre.is_none() && self.post.is_none()
    }
}

/// A workout session, active or finished
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub year: i32,
    pub week: u32,
    pub day_index: u8,
    pub workout_type_id: String,
    pub exercises: Vec<ExerciseTarget>,
    pub records: Vec<ExecutionRecord>,
    #[serde(default)]
    pub ratings: SessionRatings,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkoutSession {
    pub fn plan_key(&self) -> PlanKey {
        PlanKey::new(self.user_id.clone(), self.year, self.week)
    }
}

/// A finished session waiting for the remote store to acknowledge it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingSession {
    pub session: WorkoutSession,
    #[serde(default)]
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingSession {
    pub fn new(session: WorkoutSession, now: DateTime<Utc>) -> Self {
        Self {
            session,
            attempts: 0,
            enqueued_at: now,
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.session_id
    }

    /// Whether the backoff window has elapsed
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_rejects_duplicate_mandatory() {
        let mut plan = WeeklyPlan::new();
        plan.assign(1, DaySlot::mandatory("Peito")).unwrap();

        let err = plan.assign(4, DaySlot::mandatory("Peito")).unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateMandatory { ref workout_type_id, day: 1 } if workout_type_id == "Peito"
        ));
        assert!(plan.slot(4).is_none());
    }

    #[test]
    fn test_assign_same_day_replaces() {
        let mut plan = WeeklyPlan::new();
        plan.assign(2, DaySlot::mandatory("Costas")).unwrap();
        plan.assign(2, DaySlot::mandatory("Costas")).unwrap();
        plan.assign(3, DaySlot::rest()).unwrap();
        plan.assign(5, DaySlot::rest()).unwrap();
        assert_eq!(plan.assigned_days().count(), 3);
    }

    #[test]
    fn test_check_assignment_ignores_vacating_day() {
        let mut plan = WeeklyPlan::new();
        plan.assign(1, DaySlot::mandatory("Peito")).unwrap();
        assert!(plan
            .check_assignment(4, &DaySlot::mandatory("Peito"), &[1])
            .is_ok());
    }

    #[test]
    fn test_invalid_day_rejected() {
        let mut plan = WeeklyPlan::new();
        assert!(matches!(
            plan.assign(7, DaySlot::rest()),
            Err(Error::InvalidDay(7))
        ));
        assert!(plan.slot(9).is_none());
    }

    #[test]
    fn test_plan_key_groups_sunday_with_following_week() {
        // 2024-01-14 is a Sunday, 2024-01-15 the Monday of ISO week 3
        let sunday = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();
        let saturday = NaiveDate::from_ymd_opt(2024, 1, 20).unwrap();
        let a = PlanKey::for_date("u1", sunday);
        let b = PlanKey::for_date("u1", saturday);
        assert_eq!(a, b);
        assert_eq!(a.week, 3);
        assert_eq!(a.to_string(), "u1/2024-W03");
    }

    #[test]
    fn test_slot_serializes_snake_case() {
        let json = serde_json::to_string(&DaySlot::mandatory("Pernas")).unwrap();
        assert!(json.contains("\"category\":\"mandatory\""));
    }
}
