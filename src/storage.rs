//! Durable client storage.
//!
//! Storage is best-effort: every failure is logged and the caller falls back
//! to an in-memory value.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::StorageError;

/// Key under which the anonymous id is persisted.
pub const ANONYMOUS_ID_KEY: &str = "reveal_anonymous_id";

/// A small string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// In-memory store, used for tests and as the fail-open fallback.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store persisted as a JSON object in a single file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Store at `<dir>/storage.json`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir.into().join("storage.json"))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&values)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// Whether the anonymous id survived in durable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPersistence {
    Loaded,
    Created,
    /// Storage failed; the id lives only for this process
    Ephemeral,
}

/// Read the anonymous id, creating and persisting one on first use.
///
/// Storage errors are returned; callers fall back to [`new_anonymous_id`].
pub fn load_or_create_anonymous_id(
    store: &dyn KeyValueStore,
) -> Result<(String, IdPersistence), StorageError> {
    if let Some(id) = store.get(ANONYMOUS_ID_KEY)?.filter(|id| !id.is_empty()) {
        return Ok((id, IdPersistence::Loaded));
    }
    let id = new_anonymous_id();
    store.set(ANONYMOUS_ID_KEY, &id)?;
    Ok((id, IdPersistence::Created))
}

/// Fresh anonymous id, not yet persisted.
pub fn new_anonymous_id() -> String {
    format!("anon_{}", uuid::Uuid::new_v4().simple())
}
