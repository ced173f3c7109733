use crate::error::{SyncError, SyncResult};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Synchronous key/value store for user preferences (custom markets, last selection).
pub trait PreferenceStore: Send + Sync {
    fn get_raw(&self, key: &str) -> Option<Value>;

    fn set_raw(&self, key: &str, value: Value) -> SyncResult<()>;

    fn remove(&self, key: &str) -> SyncResult<()>;
}

impl dyn PreferenceStore {
    /// Typed read with a default when the key is absent or holds an incompatible value.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get_raw(key) {
            None => default,
            Some(value) => match serde_json::from_value(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Ignoring unreadable preference {}: {}", key, e);
                    default
                }
            },
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> SyncResult<()> {
        self.set_raw(key, serde_json::to_value(value)?)
    }
}

/// Process-local store, used by tests and headless embeddings.
#[derive(Debug, Default)]
pub struct MemoryPreferenceStore {
    values: DashMap<String, Value>,
}

impl MemoryPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get_raw(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    fn set_raw(&self, key: &str, value: Value) -> SyncResult<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Preferences persisted as a single JSON object on disk.
///
/// The whole file is rewritten on every `set`; preference writes only happen on user action.
#[derive(Debug)]
pub struct JsonFilePreferenceStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFilePreferenceStore {
    /// Open the store, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Map::new(),
            Ok(contents) => match serde_json::from_str::<Value>(&contents)? {
                Value::Object(map) => map,
                other => {
                    return Err(SyncError::Preference(format!(
                        "{} must hold a JSON object, found {}",
                        path.display(),
                        other
                    )));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, values: Mutex::new(values) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &Map<String, Value>) -> SyncResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }
}

impl PreferenceStore for JsonFilePreferenceStore {
    fn get_raw(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    fn set_raw(&self, key: &str, value: Value) -> SyncResult<()> {
        let mut values = self.values.lock();
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> SyncResult<()> {
        let mut values = self.values.lock();
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}
