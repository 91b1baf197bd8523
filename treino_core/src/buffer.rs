//! Write-through buffer of confirmed sets for the active session.
//!
//! Every accepted set rewrites the whole snapshot to durable storage before
//! returning, so a reload or crash never loses a confirmed set. A snapshot
//! left behind by a session that never reached the sync queue is offered
//! back on the next start.

use crate::storage::{self, KeyValueStore};
use crate::types::ExecutionRecord;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Storage key of the buffer snapshot
pub const BUFFER_KEY: &str = "execution_buffer";

/// Why a set was refused
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SetValidationError {
    #[error("weight must be greater than zero (got {0})")]
    InvalidWeight(f64),
    #[error("reps must be greater than zero")]
    InvalidReps,
    #[error("no session is recording")]
    NotRecording,
}

/// Check a set's input before anything is stored
pub fn validate_set(weight: f64, reps: u32) -> std::result::Result<(), SetValidationError> {
    if !weight.is_finite() || weight <= 0.0 {
        return Err(SetValidationError::InvalidWeight(weight));
    }
    if reps == 0 {
        return Err(SetValidationError::InvalidReps);
    }
    Ok(())
}

/// What is persisted under [`BUFFER_KEY`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub session_id: Uuid,
    pub workout_type_id: String,
    pub day_index: u8,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub records: Vec<ExecutionRecord>,
}

/// Result of an accepted set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordOutcome {
    /// False when the durable write failed and the set only lives in memory
    pub persisted: bool,
}

pub struct ExecutionBuffer {
    store: Arc<dyn KeyValueStore>,
    current: Option<BufferSnapshot>,
    durable: bool,
}

impl ExecutionBuffer {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            current: None,
            durable: true,
        }
    }

    /// Snapshot with records left by a session that was never handed over
    pub fn leftover(&self) -> Result<Option<BufferSnapshot>> {
        let snapshot: Option<BufferSnapshot> = storage::load(self.store.as_ref(), BUFFER_KEY)?;
        Ok(snapshot.filter(|s| !s.records.is_empty()))
    }

    /// Drop whatever a previous session left behind
    pub fn discard_leftover(&self) -> Result<()> {
        self.store.remove(BUFFER_KEY)?;
        tracing::info!("Discarded unfinished execution buffer");
        Ok(())
    }

    /// Start buffering for a new session, seeded with recovered records
    pub fn begin(
        &mut self,
        session_id: Uuid,
        workout_type_id: &str,
        day_index: u8,
        started_at: DateTime<Utc>,
        recovered: Vec<ExecutionRecord>,
    ) -> RecordOutcome {
        self.current = Some(BufferSnapshot {
            session_id,
            workout_type_id: workout_type_id.to_string(),
            day_index,
            started_at,
            updated_at: started_at,
            records: recovered,
        });
        RecordOutcome {
            persisted: self.write_through(),
        }
    }

    /// Append a confirmed set and persist the whole snapshot.
    ///
    /// Invalid input leaves the buffer untouched.
    pub fn record_set(
        &mut self,
        record: ExecutionRecord,
    ) -> std::result::Result<RecordOutcome, SetValidationError> {
        validate_set(record.weight, record.reps)?;
        let snapshot = self
            .current
            .as_mut()
            .ok_or(SetValidationError::NotRecording)?;

        snapshot.updated_at = record.captured_at;
        snapshot.records.push(record);
        Ok(RecordOutcome {
            persisted: self.write_through(),
        })
    }

    fn write_through(&mut self) -> bool {
        let Some(snapshot) = self.current.as_ref() else {
            return false;
        };
        match storage::save(self.store.as_ref(), BUFFER_KEY, snapshot) {
            Ok(()) => {
                if !self.durable {
                    tracing::info!("Durable storage is writable again");
                }
                self.durable = true;
                true
            }
            Err(e) => {
                if self.durable {
                    tracing::warn!(
                        "Unable to persist execution buffer: {}. Offline protection is unavailable.",
                        e
                    );
                }
                self.durable = false;
                false
            }
        }
    }

    pub fn records(&self) -> &[ExecutionRecord] {
        self.current
            .as_ref()
            .map(|s| s.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Whether the last write reached durable storage
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Forget the current session. Only call once the sync queue holds it.
    pub fn clear(&mut self) -> Result<()> {
        self.current = None;
        self.durable = true;
        self.store.remove(BUFFER_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::FlakyStore;
    use crate::storage::{FileStore, MemoryStore};

    fn begun(store: Arc<dyn KeyValueStore>) -> ExecutionBuffer {
        let mut buffer = ExecutionBuffer::new(store);
        buffer.begin(Uuid::new_v4(), "Peito", 1, Utc::now(), Vec::new());
        buffer
    }

    #[test]
    fn test_record_set_writes_through() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(temp_dir.path()));
        let mut buffer = begun(store.clone());

        for set in 1..=3 {
            let outcome = buffer
                .record_set(ExecutionRecord::new("supino", set, 40.0, 10))
                .unwrap();
            assert!(outcome.persisted);
        }

        // A fresh buffer over the same directory sees all three sets
        let reloaded = ExecutionBuffer::new(Arc::new(FileStore::new(temp_dir.path())));
        let leftover = reloaded.leftover().unwrap().unwrap();
        assert_eq!(leftover.records.len(), 3);
        assert_eq!(leftover.workout_type_id, "Peito");
    }

    #[test]
    fn test_invalid_sets_leave_buffer_unchanged() {
        let mut buffer = begun(Arc::new(MemoryStore::new()));

        let zero_weight = buffer.record_set(ExecutionRecord::new("supino", 1, 0.0, 10));
        assert_eq!(zero_weight, Err(SetValidationError::InvalidWeight(0.0)));

        let zero_reps = buffer.record_set(ExecutionRecord::new("supino", 1, 10.0, 0));
        assert_eq!(zero_reps, Err(SetValidationError::InvalidReps));

        let negative = buffer.record_set(ExecutionRecord::new("supino", 1, -5.0, 8));
        assert!(negative.is_err());

        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn test_record_without_session_is_refused() {
        let mut buffer = ExecutionBuffer::new(Arc::new(MemoryStore::new()));
        let result = buffer.record_set(ExecutionRecord::new("supino", 1, 40.0, 10));
        assert_eq!(result, Err(SetValidationError::NotRecording));
    }

    #[test]
    fn test_storage_failure_degrades_to_memory() {
        crate::logging::init_test();
        let store = Arc::new(FlakyStore::new());
        let mut buffer = begun(store.clone());

        store.fail_writes(true);
        let outcome = buffer
            .record_set(ExecutionRecord::new("supino", 1, 40.0, 10))
            .unwrap();
        assert!(!outcome.persisted);
        assert!(!buffer.is_durable());
        assert_eq!(buffer.len(), 1);

        // Once storage recovers the full snapshot is written again
        store.fail_writes(false);
        buffer
            .record_set(ExecutionRecord::new("supino", 2, 40.0, 10))
            .unwrap();
        assert!(buffer.is_durable());
        assert_eq!(buffer.leftover().unwrap().unwrap().records.len(), 2);
    }

    #[test]
    fn test_clear_removes_snapshot() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut buffer = begun(store.clone());
        buffer
            .record_set(ExecutionRecord::new("supino", 1, 40.0, 10))
            .unwrap();

        buffer.clear().unwrap();
        assert!(buffer.is_empty());
        assert!(store.get(BUFFER_KEY).unwrap().is_none());
    }

    #[test]
    fn test_empty_snapshot_is_not_leftover() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let _buffer = begun(store.clone());
        assert!(store.get(BUFFER_KEY).unwrap().is_some());

        let next = ExecutionBuffer::new(store);
        assert!(next.leftover().unwrap().is_none());
    }
}
