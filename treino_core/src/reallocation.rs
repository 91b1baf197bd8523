//! Reallocation of missed mandatory workouts.
//!
//! A mandatory workout whose day has passed without completion is moved to
//! the next open day (empty, rest or cardio) between today and Saturday.

use crate::plan::PlanStore;
use crate::types::{day_index, day_name, DaySlot, PlanKey, WeeklyPlan, DAYS_PER_WEEK};
use crate::validator::is_past_day;
use crate::{Error, Result};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// A proposed move of a missed workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReallocationSuggestion {
    pub from_day: u8,
    pub to_day: u8,
    pub workout_type_id: String,
}

impl ReallocationSuggestion {
    pub fn describe(&self) -> String {
        format!(
            "Move {} from {} to {}",
            self.workout_type_id,
            day_name(self.from_day),
            day_name(self.to_day)
        )
    }
}

/// A missed mandatory workout found by [`validate_week`]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeekIssue {
    pub day: u8,
    pub workout_type_id: String,
    pub message: String,
}

/// Missed workouts of the week and the moves that would fix them
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeekReview {
    pub issues: Vec<WeekIssue>,
    pub suggestions: Vec<ReallocationSuggestion>,
}

impl WeekReview {
    pub fn needs_attention(&self) -> bool {
        !self.issues.is_empty()
    }
}

fn is_open(plan: &WeeklyPlan, day: u8) -> bool {
    plan.slot(day).map_or(true, DaySlot::is_open)
}

fn next_open_day(missed_day: u8, plan: &WeeklyPlan, today: Weekday, taken: &[u8]) -> Option<u8> {
    (day_index(today)..DAYS_PER_WEEK as u8)
        .find(|&day| day != missed_day && !taken.contains(&day) && is_open(plan, day))
}

/// First day from today through Saturday that can absorb a workout
pub fn find_next_open_day(missed_day: u8, plan: &WeeklyPlan, today: Weekday) -> Option<u8> {
    next_open_day(missed_day, plan, today, &[])
}

/// Whether `day` holds a mandatory workout that was missed
fn is_missed(day: u8, plan: &WeeklyPlan, today: Weekday) -> bool {
    is_past_day(day, today) && plan.slot(day).map_or(false, DaySlot::is_pending_mandatory)
}

/// Propose a move for a missed mandatory day.
///
/// Returns `None` when the day was not missed or no open day is left.
pub fn generate_suggestion(
    missed_day: u8,
    plan: &WeeklyPlan,
    today: Weekday,
) -> Option<ReallocationSuggestion> {
    if !is_missed(missed_day, plan, today) {
        return None;
    }
    let slot = plan.slot(missed_day)?;
    let to_day = find_next_open_day(missed_day, plan, today)?;
    Some(ReallocationSuggestion {
        from_day: missed_day,
        to_day,
        workout_type_id: slot.workout_type_id.clone(),
    })
}

/// Review every past day of the week.
///
/// Each missed mandatory workout becomes an issue; suggestions claim distinct
/// destination days so they can all be applied in sequence.
pub fn validate_week(plan: &WeeklyPlan, today: Weekday) -> WeekReview {
    let mut review = WeekReview::default();
    let mut taken = Vec::new();

    for day in 0..day_index(today) {
        if !is_missed(day, plan, today) {
            continue;
        }
        let Some(slot) = plan.slot(day) else {
            continue;
        };

        review.issues.push(WeekIssue {
            day,
            workout_type_id: slot.workout_type_id.clone(),
            message: format!(
                "{} workout on {} was not completed.",
                slot.workout_type_id,
                day_name(day)
            ),
        });

        if let Some(to_day) = next_open_day(day, plan, today, &taken) {
            taken.push(to_day);
            review.suggestions.push(ReallocationSuggestion {
                from_day: day,
                to_day,
                workout_type_id: slot.workout_type_id.clone(),
            });
        }
    }

    if review.needs_attention() {
        tracing::info!(
            "Week review: {} missed workout(s), {} suggestion(s)",
            review.issues.len(),
            review.suggestions.len()
        );
    }
    review
}

/// Move a missed workout as one logical transaction.
///
/// The plan is re-read and the move re-checked first; a plan that changed in
/// the meantime yields [`Error::Conflict`] without any write. The destination
/// is written before the source is reset to rest. If resetting the source
/// fails, the destination is restored to what it held before.
pub fn apply_suggestion(
    plans: &dyn PlanStore,
    key: &PlanKey,
    suggestion: &ReallocationSuggestion,
    today: Weekday,
) -> Result<WeeklyPlan> {
    let ReallocationSuggestion {
        from_day,
        to_day,
        ref workout_type_id,
    } = *suggestion;

    let mut plan = plans
        .get(key)?
        .ok_or_else(|| Error::PlanNotFound(key.to_string()))?;

    match plan.slot(from_day) {
        Some(slot) if slot.is_pending_mandatory() && &slot.workout_type_id == workout_type_id => {}
        _ => {
            return Err(Error::Conflict(format!(
                "{} no longer holds a pending {} workout",
                day_name(from_day),
                workout_type_id
            )))
        }
    }

    if to_day == from_day || is_past_day(to_day, today) || !is_open(&plan, to_day) {
        return Err(Error::Conflict(format!(
            "{} is no longer available",
            day_name(to_day)
        )));
    }

    let moved = DaySlot::mandatory(workout_type_id.clone());
    plan.check_assignment(to_day, &moved, &[from_day])?;

    let previous = plan.slot(to_day).cloned();
    plans.upsert(key, to_day, &moved)?;

    if let Err(e) = plans.upsert(key, from_day, &DaySlot::rest()) {
        tracing::warn!(
            "Resetting {} failed ({}), restoring {}",
            day_name(from_day),
            e,
            day_name(to_day)
        );
        let restored = match &previous {
            Some(slot) => plans.upsert(key, to_day, slot),
            None => plans.clear(key, to_day),
        };
        if let Err(restore_err) = restored {
            tracing::error!(
                "Could not restore {} after failed move: {}",
                day_name(to_day),
                restore_err
            );
        }
        return Err(e);
    }

    plan.set(to_day, Some(moved))?;
    plan.set(from_day, Some(DaySlot::rest()))?;
    tracing::info!("Reallocated: {}", suggestion.describe());
    Ok(plan)
}
