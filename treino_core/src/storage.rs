//! Durable key-value storage.
//!
//! The execution buffer, the sync queue and the plan store all persist JSON
//! documents through [`KeyValueStore`]. [`FileStore`] keeps one file per key
//! and writes atomically with file locking; [`MemoryStore`] is the in-process
//! variant.

use crate::{Error, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;

/// Durable JSON document storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: &Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Exclusive lock named after `key`, held until the guard drops.
    /// Serializes read-modify-write cycles across handles and processes.
    fn lock(&self, key: &str) -> Result<StoreLock<'_>>;

    /// Set aside a document that no longer decodes. Dropped unless the store
    /// can keep it somewhere.
    fn quarantine(&self, key: &str) -> Result<()> {
        self.remove(key)
    }
}

/// Guard returned by [`KeyValueStore::lock`]
pub struct StoreLock<'a> {
    file: Option<File>,
    _guard: Option<MutexGuard<'a, ()>>,
}

impl Drop for StoreLock<'_> {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            if let Err(e) = file.unlock() {
                tracing::warn!("Failed to release store lock: {}", e);
            }
        }
    }
}

/// Read and decode a typed document.
///
/// Well-formed JSON that no longer matches `T` is quarantined and read as
/// absent, like a document that does not parse at all.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(value) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(doc) => Ok(Some(doc)),
        Err(e) => {
            tracing::warn!("Document {} has an unexpected shape: {}. Treating as absent.", key, e);
            store.quarantine(key)?;
            Ok(None)
        }
    }
}

/// Encode and write a typed document
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store.set(key, &value)
}

// ============================================================================
// File-backed store
// ============================================================================

/// One JSON file per key inside a directory
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_key(key)))
    }

    /// Move an unreadable document aside so it is kept for manual recovery
    fn move_aside(&self, path: &Path) {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        let target = path.with_extension(format!("json.corrupt-{}", stamp));
        match std::fs::rename(path, &target) {
            Ok(()) => tracing::warn!("Moved unreadable document {:?} to {:?}", path, target),
            Err(e) => tracing::warn!("Unable to quarantine {:?}: {}", path, e),
        }
    }
}

/// Keep keys filesystem-safe: `[A-Za-z0-9._-]` pass through, the rest become `%XX`
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;
        read?;

        match serde_json::from_str::<Value>(&contents) {
            Ok(value) => {
                tracing::debug!("Loaded {} from {:?}", key, path);
                Ok(Some(value))
            }
            Err(e) => {
                tracing::warn!("Failed to parse {:?}: {}. Treating as absent.", path, e);
                drop(file);
                self.move_aside(&path);
                Ok(None)
            }
        }
    }

    /// Atomically writes the document by:
    /// 1. Writing to a temp file
    /// 2. Syncing to disk
    /// 3. Renaming over the original
    fn set(&self, key: &str, value: &Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);

        let temp = NamedTempFile::new_in(&self.dir)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(value)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved {} to {:?}", key, path);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Removed {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn quarantine(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            self.move_aside(&path);
        }
        Ok(())
    }

    fn lock(&self, key: &str) -> Result<StoreLock<'_>> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.lock", encode_key(key)));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(StoreLock {
            file: Some(file),
            _guard: None,
        })
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store; contents vanish with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
    lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Value>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn lock(&self, _key: &str) -> Result<StoreLock<'_>> {
        let guard = self
            .lock
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))?;
        Ok(StoreLock {
            file: None,
            _guard: Some(guard),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_store_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        store.set("sync_queue", &json!([{"a": 1}])).unwrap();
        let value = store.get("sync_queue").unwrap().unwrap();
        assert_eq!(value, json!([{"a": 1}]));

        store.remove("sync_queue").unwrap();
        assert!(store.get("sync_queue").unwrap().is_none());
        // Removing twice is fine
        store.remove("sync_queue").unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        FileStore::new(temp_dir.path())
            .set("execution_buffer", &json!({"records": [1, 2, 3]}))
            .unwrap();

        let reopened = FileStore::new(temp_dir.path());
        let value = reopened.get("execution_buffer").unwrap().unwrap();
        assert_eq!(value["records"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_keys_are_encoded() {
        let store = FileStore::new("/tmp/x");
        let path = store.path_for("plan/local/2024-W03");
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "plan%2Flocal%2F2024-W03.json"
        );
    }

    #[test]
    fn test_corrupted_document_is_quarantined() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        std::fs::write(store.path_for("sync_queue"), "{ invalid json }").unwrap();

        assert!(store.get("sync_queue").unwrap().is_none());
        assert!(!store.path_for("sync_queue").exists());

        let kept: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt"))
            .collect();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_atomic_set_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        store.set("a", &json!(1)).unwrap();
        store.set("a", &json!(2)).unwrap();

        let names: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name())
            .collect();
        assert_eq!(names.len(), 1, "unexpected files: {:?}", names);
    }

    #[test]
    fn test_typed_helpers() {
        let store = MemoryStore::new();
        save(&store, "numbers", &vec![1u32, 2, 3]).unwrap();
        let loaded: Option<Vec<u32>> = load(&store, "numbers").unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));

        let missing: Option<Vec<u32>> = load(&store, "absent").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_wrong_shape_is_quarantined() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        store.set("numbers", &json!({"records": [1, 2, 3]})).unwrap();

        let loaded: Option<Vec<u32>> = load(&store, "numbers").unwrap();
        assert!(loaded.is_none());
        assert!(!store.path_for("numbers").exists());

        let kept = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt"))
            .count();
        assert_eq!(kept, 1);
    }

    #[test]
    fn test_lock_is_released_on_drop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        let other = FileStore::new(temp_dir.path());

        let guard = store.lock("sync_queue").unwrap();
        let path = temp_dir.path().join("sync_queue.lock");
        let outsider = File::open(&path).unwrap();
        assert!(outsider.try_lock_exclusive().is_err());
        drop(guard);

        drop(other.lock("sync_queue").unwrap());
        assert!(outsider.try_lock_exclusive().is_ok());
    }
}
