//! Key/value storage tiers backing the fare cache.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FareError, Result};

const STORE_SCHEMA_VERSION: u32 = 1;
pub const CACHE_FILE_NAME: &str = "fare-cache.v1.json";
const CACHE_DIR_NAME: &str = "openagents-fares";

/// Synchronous string key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

fn lock_error(context: &str) -> FareError {
    FareError::Storage(format!("{context} lock poisoned"))
}

/// Session-scoped tier. Starts empty on every construction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.entries.lock().map_err(|_| lock_error("memory store"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileStoreDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

/// Durable tier: a versioned JSON document flushed on every write.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn load_default() -> Self {
        Self::load(default_cache_path())
    }

    /// Load `path`. Missing, corrupt, or foreign-version files load as empty.
    pub fn load(path: PathBuf) -> Self {
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<FileStoreDocument>(raw.as_str()) {
                Ok(document) if document.version == STORE_SCHEMA_VERSION => document.entries,
                Ok(document) => {
                    warn!(
                        path = %path.display(),
                        version = document.version,
                        "ignoring fare cache with unsupported schema version"
                    );
                    BTreeMap::new()
                }
                Err(error) => {
                    warn!(path = %path.display(), "ignoring corrupt fare cache: {error}");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        debug!(path = %path.display(), entries = entries.len(), "loaded fare cache file");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    fn entries(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries.lock().map_err(|_| lock_error("file store"))
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| FareError::Storage(format!("cache mkdir failed: {error}")))?;
        }
        let encoded = serde_json::to_string_pretty(&FileStoreDocument {
            version: STORE_SCHEMA_VERSION,
            entries: entries.clone(),
        })
        .map_err(|error| FareError::Storage(format!("cache encode failed: {error}")))?;
        fs::write(&self.path, encoded)
            .map_err(|error| FareError::Storage(format!("cache write failed: {error}")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries()?;
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries()?;
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }
}

#[must_use]
pub fn default_cache_path() -> PathBuf {
    if let Some(mut data_dir) = dirs::data_local_dir() {
        data_dir.push(CACHE_DIR_NAME);
        data_dir.push(CACHE_FILE_NAME);
        return data_dir;
    }

    if let Some(mut home_dir) = dirs::home_dir() {
        home_dir.push(format!(".{CACHE_DIR_NAME}"));
        home_dir.push(CACHE_FILE_NAME);
        return home_dir;
    }

    PathBuf::from(CACHE_FILE_NAME)
}

/// The short-lived and durable tiers used together.
#[derive(Clone)]
pub struct TieredStore {
    pub short: Arc<dyn KeyValueStore>,
    pub durable: Arc<dyn KeyValueStore>,
}

impl TieredStore {
    #[must_use]
    pub fn new(short: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> Self {
        Self { short, durable }
    }

    pub fn set_both(&self, key: &str, value: &str) -> Result<()> {
        self.short.set(key, value)?;
        self.durable.set(key, value)
    }

    pub fn remove_both(&self, key: &str) -> Result<()> {
        self.short.remove(key)?;
        self.durable.remove(key)
    }

    /// Union of keys across both tiers, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = self.short.keys()?.into_iter().collect::<BTreeSet<_>>();
        keys.extend(self.durable.keys()?);
        Ok(keys.into_iter().collect())
    }
}

impl std::fmt::Debug for TieredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{FileStore, KeyValueStore, MemoryStore, TieredStore};

    #[test]
    fn file_store_persists_across_reloads() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("nested").join("fare-cache.v1.json");
        let store = FileStore::load(path.clone());
        store.set("fare_a", "{\"x\":1}").expect("write");
        store.set("fare_b", "{\"x\":2}").expect("write");
        store.remove("fare_b").expect("remove");

        let recovered = FileStore::load(path);
        assert_eq!(
            recovered.get("fare_a").expect("read").as_deref(),
            Some("{\"x\":1}")
        );
        assert_eq!(recovered.get("fare_b").expect("read"), None);
    }

    #[test]
    fn file_store_recovers_as_empty_on_corrupt_or_foreign_payload() {
        let temp = tempfile::tempdir().expect("temp dir");
        let corrupt = temp.path().join("corrupt.json");
        std::fs::write(&corrupt, "not json").expect("write corrupt file");
        assert!(FileStore::load(corrupt).keys().expect("keys").is_empty());

        let foreign = temp.path().join("foreign.json");
        std::fs::write(&foreign, r#"{"version":9,"entries":{"fare_a":"1"}}"#)
            .expect("write foreign file");
        assert!(FileStore::load(foreign).keys().expect("keys").is_empty());
    }

    #[test]
    fn tiered_store_writes_and_lists_both_tiers() {
        let short = Arc::new(MemoryStore::new());
        let durable = Arc::new(MemoryStore::new());
        let tiers = TieredStore::new(short.clone(), durable.clone());

        tiers.set_both("fare_a", "1").expect("set");
        durable.set("fare_b", "2").expect("set");
        short.set("other", "3").expect("set");

        assert_eq!(short.get("fare_a").expect("get").as_deref(), Some("1"));
        assert_eq!(durable.get("fare_a").expect("get").as_deref(), Some("1"));
        assert_eq!(
            tiers.keys().expect("keys"),
            vec!["fare_a".to_string(), "fare_b".to_string(), "other".to_string()]
        );

        tiers.remove_both("fare_a").expect("remove");
        assert_eq!(short.get("fare_a").expect("get"), None);
        assert_eq!(durable.get("fare_a").expect("get"), None);
    }
}
