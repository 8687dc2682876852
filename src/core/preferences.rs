//! Key/value preference persistence
//!
//! Values are opaque strings (callers store JSON). The file-backed store keeps
//! one file per key and mirrors everything in memory, so reads never touch disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::core::error::{CatalogError, Result};
use crate::core::utils::{sanitize_file_name, write_atomic};

/// Synchronous preference storage
///
/// Implementations must make each call atomic with respect to other calls.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// Preferences persisted as `<dir>/<key>.pref`
pub struct FilePreferenceStore {
    dir: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FilePreferenceStore {
    /// Open the store, loading every existing key
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            values: RwLock::new(HashMap::new()),
        };
        store.load_all()?;

        tracing::debug!(dir = ?store.dir, "Preference store opened");
        Ok(store)
    }

    fn load_all(&self) -> Result<()> {
        let mut loaded = HashMap::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("pref") {
                continue;
            }
            match Self::load_entry(&path) {
                Ok(entry) => {
                    loaded.insert(entry.key, entry.value);
                }
                Err(e) => {
                    tracing::warn!(
                        path = ?path,
                        error = %e,
                        "Failed to load preference file, skipping"
                    );
                }
            }
        }

        *self.write_lock()? = loaded;
        Ok(())
    }

    fn load_entry(path: &Path) -> Result<StoredPreference> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn file_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.pref", sanitize_file_name(key)))
    }

    fn write_lock(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, String>>> {
        self.values
            .write()
            .map_err(|e| CatalogError::ConfigError(format!("Failed to acquire preference lock: {}", e)))
    }
}

/// On-disk form; keeps the original key since file names are sanitized
#[derive(serde::Serialize, serde::Deserialize)]
struct StoredPreference {
    key: String,
    value: String,
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|e| CatalogError::ConfigError(format!("Failed to acquire preference lock: {}", e)))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.write_lock()?;

        let stored = StoredPreference {
            key: key.to_string(),
            value: value.to_string(),
        };
        write_atomic(&self.file_path(key), serde_json::to_string(&stored)?.as_bytes())?;

        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.write_lock()?;

        match std::fs::remove_file(self.file_path(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        values.remove(key);
        Ok(())
    }
}

/// Volatile store for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryPreferenceStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|e| CatalogError::ConfigError(e.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|e| CatalogError::ConfigError(e.to_string()))?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values
            .write()
            .map_err(|e| CatalogError::ConfigError(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Typed JSON access on top of any [`PreferenceStore`]
pub trait PreferenceStoreExt: PreferenceStore {
    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set(key, &serde_json::to_string(value)?)
    }
}

impl<S: PreferenceStore + ?Sized> PreferenceStoreExt for S {}
