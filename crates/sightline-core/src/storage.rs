//! Durable key-value storage.
//!
//! The pipeline persists three things through [`DurableStore`]: presence state,
//! history buffers and pending delayed deliveries. Values are JSON documents.
//!
//! Corruption is a policy of this module rather than of the callers:
//! [`load_json_or_default`] drops an undecodable record and hands back an empty
//! state, so a damaged file never stops the pipeline from starting.

use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::config::ConfigResult;
use crate::error::{Result, SightlineError};

static KEY_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._-]{0,63}$").unwrap_or_else(|e| unreachable!("static regex: {e}"))
});

/// Byte-oriented persistent storage.
pub trait DurableStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be read.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing medium cannot be written.
    fn delete(&self, key: &str) -> Result<()>;
}

/// One JSON file per key inside a data directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `data_dir`. The directory is created lazily.
    #[must_use]
    pub const fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Store in the platform default location.
    ///
    /// # Errors
    ///
    /// Returns an error if no platform data directory can be determined.
    pub fn default_location() -> ConfigResult<Self> {
        Ok(Self::new(default_data_dir()?))
    }

    /// Root directory of this store.
    #[must_use]
    pub const fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if !KEY_FORMAT.is_match(key) {
            return Err(SightlineError::PersistenceError(format!(
                "invalid store key '{key}'"
            )));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl DurableStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.data_dir)?;
        // A crash mid-write must leave the previous version intact, so the
        // data is on disk before the rename makes it visible.
        let tmp = self.data_dir.join(format!(".{key}.json.tmp"));
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &path)?;
        sync_dir(&self.data_dir);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Flush a directory entry change. Best effort: not every platform can open
/// a directory for syncing.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "Failed to sync store directory");
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Volatile store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl DurableStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries().get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// Load and decode `key`, degrading to `T::default()` on any failure.
///
/// An undecodable record is logged and deleted so the next write starts clean.
pub fn load_json_or_default<T>(store: &dyn DurableStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match store.load(key) {
        Ok(None) => T::default(),
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                let err = SightlineError::CorruptRecord {
                    key: key.to_string(),
                    message: e.to_string(),
                };
                warn!(error = %err, "Discarding corrupt record, starting empty");
                if let Err(e) = store.delete(key) {
                    warn!(key, error = %e, "Failed to delete corrupt record");
                }
                T::default()
            }
        },
        Err(e) => {
            warn!(key, error = %e, "Failed to read record, starting empty");
            T::default()
        }
    }
}

/// Encode `value` as JSON and store it under `key`.
///
/// # Errors
///
/// Returns an error if encoding or the underlying write fails.
pub fn save_json<T: Serialize + ?Sized>(store: &dyn DurableStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| SightlineError::PersistenceError(format!("encode '{key}': {e}")))?;
    store.save(key, &bytes)
}

/// Get the default storage location.
///
/// On Linux: `/var/lib/sightline/`
/// Elsewhere: the platform data directory.
///
/// # Errors
///
/// Returns an error if no platform data directory can be determined.
pub fn default_data_dir() -> ConfigResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/var/lib/sightline"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "sightline")
            .ok_or_else(|| crate::config::ConfigError::NotFound(PathBuf::from("data directory")))?;
        Ok(dirs.data_dir().to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        items: Vec<u32>,
    }

    #[test]
    fn test_file_store_save_load_delete() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data"));

        assert_eq!(store.load("presence.ledger").unwrap(), None);
        store.save("presence.ledger", b"[1,2]").unwrap();
        assert_eq!(store.load("presence.ledger").unwrap().unwrap(), b"[1,2]");

        store.delete("presence.ledger").unwrap();
        assert_eq!(store.load("presence.ledger").unwrap(), None);
        // Deleting again is fine.
        store.delete("presence.ledger").unwrap();
    }

    #[test]
    fn test_file_store_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.save("history.buffer", b"{}").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["history.buffer.json".to_string()]);
    }

    #[test]
    fn test_file_store_overwrites_torn_temp_file() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        store.save("presence.ledger", b"{\"v\":1}").unwrap();
        // Leftover of a write interrupted before its rename.
        std::fs::write(dir.path().join(".presence.ledger.json.tmp"), b"{\"v\":1, garbage").unwrap();
        assert_eq!(store.load("presence.ledger").unwrap().unwrap(), b"{\"v\":1}");

        store.save("presence.ledger", b"{}").unwrap();
        assert_eq!(store.load("presence.ledger").unwrap().unwrap(), b"{}");
        assert!(!dir.path().join(".presence.ledger.json.tmp").exists());
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf());
        assert!(store.save("../escape", b"x").is_err());
        assert!(store.load("Upper").is_err());
    }

    #[test]
    fn test_corrupt_record_degrades_to_default_and_is_removed() {
        let store = MemoryStore::new();
        store.save("doc", b"{not json").unwrap();

        let doc: Doc = load_json_or_default(&store, "doc");
        assert_eq!(doc, Doc::default());
        assert_eq!(store.load("doc").unwrap(), None);
    }

    #[test]
    fn test_json_helpers_round_trip() {
        let store = MemoryStore::new();
        save_json(&store, "doc", &Doc { items: vec![3, 4] }).unwrap();
        let doc: Doc = load_json_or_default(&store, "doc");
        assert_eq!(doc.items, vec![3, 4]);
    }

    #[test]
    fn test_default_data_dir_is_valid_path() {
        let dir = default_data_dir().unwrap();
        assert!(!dir.as_os_str().is_empty());
    }
}
