//! Default catalog of workout types.
//!
//! Each mandatory workout type maps to an ordered list of exercises with
//! their target series, reps and rest.

use crate::types::*;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

fn exercise(id: &str, name: &str, series: u32, target_reps: u32, rest_seconds: u32) -> ExerciseTarget {
    ExerciseTarget {
        exercise_id: id.into(),
        name: name.into(),
        series,
        target_reps,
        rest_seconds,
    }
}

fn workout(id: &str, name: &str, exercises: Vec<ExerciseTarget>) -> (String, WorkoutTemplate) {
    (
        id.to_string(),
        WorkoutTemplate {
            workout_type_id: id.into(),
            name: name.into(),
            exercises,
        },
    )
}

/// Builds the built-in workout templates.
///
/// Prefer [`get_default_catalog`] outside of tests.
pub fn build_default_catalog() -> Catalog {
    let workouts: HashMap<String, WorkoutTemplate> = [
        workout(
            "Peito",
            "Chest",
            vec![
                exercise("supino_reto", "Flat bench press", 4, 10, 90),
                exercise("supino_inclinado", "Incline dumbbell press", 3, 10, 75),
                exercise("crucifixo", "Dumbbell fly", 3, 12, 60),
                exercise("triceps_corda", "Rope triceps pushdown", 3, 12, 60),
            ],
        ),
        workout(
            "Costas",
            "Back",
            vec![
                exercise("puxada_frente", "Lat pulldown", 4, 10, 90),
                exercise("remada_curvada", "Bent-over row", 4, 8, 90),
                exercise("remada_baixa", "Seated cable row", 3, 12, 60),
                exercise("rosca_direta", "Barbell curl", 3, 10, 60),
            ],
        ),
        workout(
            "Pernas",
            "Legs",
            vec![
                exercise("agachamento", "Back squat", 4, 8, 120),
                exercise("leg_press", "Leg press", 4, 10, 90),
                exercise("cadeira_extensora", "Leg extension", 3, 12, 60),
                exercise("mesa_flexora", "Lying leg curl", 3, 12, 60),
                exercise("panturrilha", "Standing calf raise", 4, 15, 45),
            ],
        ),
        workout(
            "Ombro",
            "Shoulders",
            vec![
                exercise("desenvolvimento", "Overhead press", 4, 8, 90),
                exercise("elevacao_lateral", "Lateral raise", 3, 12, 60),
                exercise("crucifixo_inverso", "Reverse fly", 3, 12, 60),
            ],
        ),
        workout(
            "Braco",
            "Arms",
            vec![
                exercise("rosca_alternada", "Alternating dumbbell curl", 3, 10, 60),
                exercise("triceps_testa", "Skull crusher", 3, 10, 60),
                exercise("rosca_martelo", "Hammer curl", 3, 12, 45),
                exercise("mergulho", "Bench dip", 3, 12, 45),
            ],
        ),
    ]
    .into_iter()
    .collect();

    Catalog { workouts }
}

impl Catalog {
    /// Template for a workout type, if known
    pub fn template(&self, workout_type_id: &str) -> Option<&WorkoutTemplate> {
        self.workouts.get(workout_type_id)
    }

    /// Workout type ids, sorted
    pub fn workout_type_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.workouts.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Validate the catalog for consistency and completeness
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, template) in &self.workouts {
            if id.is_empty() || template.workout_type_id.is_empty() {
                errors.push("Workout has empty ID".to_string());
            }
            if id != &template.workout_type_id {
                errors.push(format!(
                    "Workout key '{}' doesn't match workout_type_id '{}'",
                    id, template.workout_type_id
                ));
            }
            if template.exercises.is_empty() {
                errors.push(format!("Workout '{}' has no exercises", id));
            }

            let mut seen = std::collections::HashSet::new();
            for ex in &template.exercises {
                if !seen.insert(ex.exercise_id.as_str()) {
                    errors.push(format!(
                        "Workout '{}' lists exercise '{}' twice",
                        id, ex.exercise_id
                    ));
                }
                if ex.series == 0 {
                    errors.push(format!(
                        "Workout '{}': exercise '{}' has zero series",
                        id, ex.exercise_id
                    ));
                }
                if ex.target_reps == 0 {
                    errors.push(format!(
                        "Workout '{}': exercise '{}' has zero target reps",
                        id, ex.exercise_id
                    ));
                }
            }
        }

        errors
    }
}
