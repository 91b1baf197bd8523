//! Weekly plan persistence and guarded editing.

use crate::storage::{self, KeyValueStore};
use crate::types::{check_day, day_name, DaySlot, PlanKey, WeeklyPlan};
use crate::validator::{can_edit_day, EditVerdict};
use crate::Result;
use chrono::{DateTime, Utc, Weekday};
use std::sync::Arc;

/// Persists a week's day-slot assignments
pub trait PlanStore: Send + Sync {
    fn get(&self, key: &PlanKey) -> Result<Option<WeeklyPlan>>;
    fn upsert(&self, key: &PlanKey, day: u8, slot: &DaySlot) -> Result<()>;
    /// Empty a slot again
    fn clear(&self, key: &PlanKey, day: u8) -> Result<()>;
}

/// Plan store keeping one document per (user, year, week)
pub struct KvPlanStore {
    store: Arc<dyn KeyValueStore>,
}

impl KvPlanStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn document_key(key: &PlanKey) -> String {
        format!("plan/{}", key)
    }

    fn write_day(&self, key: &PlanKey, day: u8, slot: Option<DaySlot>) -> Result<()> {
        check_day(day)?;
        let doc = Self::document_key(key);
        let mut plan: WeeklyPlan = storage::load(self.store.as_ref(), &doc)?.unwrap_or_default();
        plan.set(day, slot)?;
        storage::save(self.store.as_ref(), &doc, &plan)
    }
}

impl PlanStore for KvPlanStore {
    fn get(&self, key: &PlanKey) -> Result<Option<WeeklyPlan>> {
        storage::load(self.store.as_ref(), &Self::document_key(key))
    }

    fn upsert(&self, key: &PlanKey, day: u8, slot: &DaySlot) -> Result<()> {
        self.write_day(key, day, Some(slot.clone()))?;
        tracing::debug!("Stored {} slot for {} of {}", slot.category, day_name(day), key);
        Ok(())
    }

    fn clear(&self, key: &PlanKey, day: u8) -> Result<()> {
        self.write_day(key, day, None)
    }
}

/// Result of a guarded edit
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// Written. `warning` is set when a completed day was reassigned.
    Applied { warning: Option<String> },
    /// Refused; nothing was written
    Blocked(EditVerdict),
}

/// Plan writes that go through the editability rules and the
/// one-mandatory-type-per-week check
pub struct PlanEditor {
    plans: Arc<dyn PlanStore>,
    key: PlanKey,
}

impl PlanEditor {
    pub fn new(plans: Arc<dyn PlanStore>, key: PlanKey) -> Self {
        Self { plans, key }
    }

    pub fn key(&self) -> &PlanKey {
        &self.key
    }

    /// Current plan, empty when nothing was stored yet
    pub fn load(&self) -> Result<WeeklyPlan> {
        Ok(self.plans.get(&self.key)?.unwrap_or_default())
    }

    /// Assign a slot to a day if the rules allow it
    pub fn quick_edit(&self, day: u8, slot: DaySlot, today: Weekday) -> Result<EditOutcome> {
        let plan = self.load()?;
        let verdict = can_edit_day(day, &plan, today);
        if !verdict.can_edit {
            tracing::info!("Edit of {} refused: {:?}", day_name(day), verdict.reason);
            return Ok(EditOutcome::Blocked(verdict));
        }

        plan.check_assignment(day, &slot, &[])?;

        let slot = DaySlot {
            completed: false,
            completed_at: None,
            ..slot
        };
        self.plans.upsert(&self.key, day, &slot)?;
        tracing::info!(
            "Planned {} ({}) on {}",
            slot.workout_type_id,
            slot.category,
            day_name(day)
        );

        let warning = if verdict.needs_warning() {
            verdict.message
        } else {
            None
        };
        Ok(EditOutcome::Applied { warning })
    }

    pub fn mark_completed(
        &self,
        day: u8,
        workout_type_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        mark_day_completed(self.plans.as_ref(), &self.key, day, workout_type_id, at)
    }
}

/// Mark a day's workout as done.
///
/// An empty day receives a mandatory slot for the workout performed,
/// unless that type is already planned elsewhere this week. Returns
/// whether the plan was changed.
pub fn mark_day_completed(
    plans: &dyn PlanStore,
    key: &PlanKey,
    day: u8,
    workout_type_id: &str,
    at: DateTime<Utc>,
) -> Result<bool> {
    check_day(day)?;
    let plan = plans.get(key)?.unwrap_or_default();

    let mut slot = match plan.slot(day) {
        Some(slot) if slot.completed => return Ok(false),
        Some(slot) => slot.clone(),
        None => {
            let slot = DaySlot::mandatory(workout_type_id);
            if let Err(e) = plan.check_assignment(day, &slot, &[]) {
                tracing::warn!("Not marking {} as completed: {}", day_name(day), e);
                return Ok(false);
            }
            slot
        }
    };

    slot.mark_completed(at);
    plans.upsert(key, day, &slot)?;
    tracing::info!("Marked {} as completed in {}", day_name(day), key);
    Ok(true)
}
