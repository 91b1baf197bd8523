#![forbid(unsafe_code)]

//! Core domain model and business logic for the treino workout tracker.
//!
//! This crate provides:
//! - Weekly plans, editability rules and reallocation of missed workouts
//! - The write-through execution buffer for an active workout
//! - The durable sync queue and the remote sink seam
//! - The workout session controller
//! - Persistence (key-value documents, commit log, CSV export)

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod storage;
pub mod plan;
pub mod validator;
pub mod reallocation;
pub mod buffer;
pub mod sink;
pub mod sync;
pub mod controller;
pub mod export;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog};
pub use config::Config;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use plan::{EditOutcome, KvPlanStore, PlanEditor, PlanStore};
pub use validator::{can_edit_day, EditReason, EditVerdict};
pub use reallocation::{apply_suggestion, generate_suggestion, validate_week, ReallocationSuggestion};
pub use buffer::{ExecutionBuffer, SetValidationError};
pub use sink::{JsonlCommitLog, OfflineSink, RemoteExecutionSink};
pub use sync::{FlushMode, FlushReport, SyncQueue};
pub use controller::{
    RecoveryChoice, SessionPlan, SessionState, SetOutcome, StartOutcome, WorkoutSessionController,
};
pub use export::export_records_csv;
