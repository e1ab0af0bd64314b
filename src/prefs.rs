//! Key-value preference storage.
//!
//! The preference store is the only persistent state the crate touches: the
//! beacon opt-out flag and the dismissed announcement id. Every operation
//! returns a `Result` so callers decide how an unavailable store degrades;
//! both current callers treat a failed read as "absent".
//!
//! Two stores are provided:
//!
//! - [`MemoryStore`] — process-local map, discarded on exit.
//! - [`JsonFileStore`] — one JSON object file, persisted across restarts.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::trace;

use crate::error::AppError;

/// String key-value store backing user preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;

    fn set(&self, key: &str, value: &str) -> Result<(), AppError>;

    /// Returns `true` if the key was present.
    fn remove(&self, key: &str) -> Result<bool, AppError>;
}

// ── MemoryStore ───────────────────────────────────────────────────────────────

/// Ephemeral in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AppError> {
        self.data
            .lock()
            .map_err(|_| AppError::Storage("memory store lock poisoned".into()))
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, AppError> {
        Ok(self.lock()?.remove(key).is_some())
    }
}

// ── JsonFileStore ─────────────────────────────────────────────────────────────

/// File-backed store holding a single flat JSON object.
///
/// A missing file reads as an empty store; the file and its parent directory
/// are created on first write. Writes go to a sibling `.tmp` file that is
/// then renamed over the original, so readers never see a half-written file.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Mutex::new(()) }
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, AppError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(AppError::Storage(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )));
            }
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            AppError::Storage(format!("corrupt preference file {}: {e}", self.path.display()))
        })
    }

    fn write_all(&self, data: &BTreeMap<String, String>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        fs::rename(&tmp, &self.path)?;
        trace!(path = %self.path.display(), keys = data.len(), "preferences written");
        Ok(())
    }

    fn modify<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> Result<T, AppError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Storage("preference file lock poisoned".into()))?;
        let mut data = self.read_all()?;
        let out = f(&mut data);
        self.write_all(&data)?;
        Ok(out)
    }
}

impl PreferenceStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.modify(|data| {
            data.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<bool, AppError> {
        self.modify(|data| data.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_store_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert!(store.remove("k").unwrap());
        assert!(!store.remove("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prefs.json");
        let store = JsonFileStore::new(&path);
        assert_eq!(store.get("anything").unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("prefs.json");
        JsonFileStore::new(&path).set("beacon:opt_out", "true").unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("beacon:opt_out").unwrap().as_deref(), Some("true"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn file_store_keeps_unrelated_keys() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::new(tmp.path().join("prefs.json"));
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert!(store.remove("a").unwrap());
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_store_corrupt_file_is_storage_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("prefs.json");
        fs::write(&path, "{ this is not json").unwrap();
        let err = JsonFileStore::new(&path).get("k").unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
