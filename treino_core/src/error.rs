//! Error types for the treino_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for treino_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog validation error
    #[error("Catalog validation error: {0}")]
    CatalogValidation(String),

    /// Durable storage could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// Day index outside 0..=6
    #[error("Invalid day index {0} (expected 0-6)")]
    InvalidDay(u8),

    /// A mandatory workout type would appear twice in one week
    #[error("Workout '{workout_type_id}' is already planned on day {day}")]
    DuplicateMandatory { workout_type_id: String, day: u8 },

    /// The plan changed between suggestion and apply
    #[error("Plan conflict: {0}")]
    Conflict(String),

    /// No plan stored for the requested week
    #[error("No plan found for {0}")]
    PlanNotFound(String),

    /// Another workout session is already running
    #[error("A workout session is already active")]
    SessionActive,

    /// Operation requires an active workout session
    #[error("No active workout session")]
    NoActiveSession,

    /// Operation not allowed in the controller's current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Readiness rating outside 0-5
    #[error("Rating {0} is out of range (expected 0-5)")]
    InvalidRating(u8),

    /// Remote commit failed
    #[error("Remote commit failed: {0}")]
    Remote(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
