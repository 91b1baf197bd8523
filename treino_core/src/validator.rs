//! Editability rules for the weekly plan.
//!
//! These are pure functions over a [`WeeklyPlan`] and "today". Blocked edits
//! are reported as an [`EditVerdict`] value, never as an error.

use crate::types::{check_day, day_index, day_name, WeeklyPlan};
use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Why a day is (or isn't) editable
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EditReason {
    /// Freely editable
    None,
    /// Editable, but the day was already completed and history may change
    CompletedWarning,
    /// Assigned, not completed and already behind us
    PastDay,
    /// An earlier mandatory workout is still pending
    PendingWorkout,
    /// Index outside 0-6
    InvalidDay,
}

/// Result of [`can_edit_day`]
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditVerdict {
    pub can_edit: bool,
    pub reason: EditReason,
    pub message: Option<String>,
    pub blocking_day: Option<u8>,
}

impl EditVerdict {
    fn editable() -> Self {
        Self {
            can_edit: true,
            reason: EditReason::None,
            message: None,
            blocking_day: None,
        }
    }

    /// Editing is allowed but the caller has to surface a warning
    pub fn needs_warning(&self) -> bool {
        self.reason == EditReason::CompletedWarning
    }
}

/// A day strictly before today's weekday. Today itself is never past.
pub fn is_past_day(day: u8, today: Weekday) -> bool {
    day < day_index(today)
}

/// First mandatory, not-completed day before `day`, ascending
pub fn find_blocking_day(day: u8, plan: &WeeklyPlan) -> Option<u8> {
    (0..day).find(|&earlier| {
        plan.slot(earlier)
            .map_or(false, |slot| slot.is_pending_mandatory())
    })
}

/// Decide whether `day` may be edited.
///
/// Rules, first match wins:
/// 1. completed slot: editable with a warning
/// 2. assigned past slot: locked
/// 3. an earlier pending mandatory workout blocks
/// 4. otherwise editable
pub fn can_edit_day(day: u8, plan: &WeeklyPlan, today: Weekday) -> EditVerdict {
    if check_day(day).is_err() {
        return EditVerdict {
            can_edit: false,
            reason: EditReason::InvalidDay,
            message: Some(format!("Day {} does not exist.", day)),
            blocking_day: None,
        };
    }

    let slot = plan.slot(day);

    if slot.map_or(false, |s| s.completed) {
        return EditVerdict {
            can_edit: true,
            reason: EditReason::CompletedWarning,
            message: Some("Workout already completed. Changes may affect your history.".into()),
            blocking_day: None,
        };
    }

    if slot.is_some() && is_past_day(day, today) {
        return EditVerdict {
            can_edit: false,
            reason: EditReason::PastDay,
            message: Some("Past days that were not completed cannot be edited.".into()),
            blocking_day: None,
        };
    }

    if let Some(blocking) = find_blocking_day(day, plan) {
        return EditVerdict {
            can_edit: false,
            reason: EditReason::PendingWorkout,
            message: Some(format!(
                "{}'s workout must be completed first.",
                day_name(blocking)
            )),
            blocking_day: Some(blocking),
        };
    }

    EditVerdict::editable()
}
