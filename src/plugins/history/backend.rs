//! Size-bounded key-value backends for the session store.
//!
//! Both backends count the bytes of every stored key and value against an
//! optional quota and refuse a write that would exceed it with
//! `StorageError::QuotaExceeded`, which is what the store's eviction path
//! reacts to.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::StorageError;

pub trait KeyValueStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

fn check_quota(quota: Option<u64>, used_by_others: u64, key: &str, value: &str) -> Result<(), StorageError> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let needed = used_by_others + key.len() as u64 + value.len() as u64;
    if needed > quota {
        return Err(StorageError::quota_exceeded(format!(
            "writing `{key}` needs {needed} bytes, quota is {quota} bytes"
        )));
    }
    Ok(())
}

/// In-process storage; the default for tests and detached front-ends.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|_| StorageError::unavailable("Memory storage lock poisoned"))
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries()?;
        let used_by_others: u64 = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum();
        check_quota(self.quota_bytes, used_by_others, key, value)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

const FILE_EXT: &str = "json";

/// One file per key under `dir`; writes go through a temp file and a rename.
pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: Option<u64>,
    // Serializes read-modify-write of the quota accounting.
    write_gate: Mutex<()>,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>, quota_bytes: Option<u64>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            quota_bytes,
            write_gate: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::io(format!("Invalid storage key `{key}`")));
        }
        Ok(self.dir.join(format!("{key}.{FILE_EXT}")))
    }

    fn used_by_others(&self, key: &str) -> Result<u64, StorageError> {
        let mut used = 0u64;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem == key {
                continue;
            }
            used += stem.len() as u64 + entry.metadata()?.len();
        }
        Ok(used)
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let _gate = self
            .write_gate
            .lock()
            .map_err(|_| StorageError::unavailable("File storage lock poisoned"))?;

        check_quota(self.quota_bytes, self.used_by_others(key)?, key, value)?;

        // Rename keeps readers off half-written files. No fsync: this runs on
        // every streamed delta.
        let tmp = self.dir.join(format!(".{key}.{FILE_EXT}.tmp"));
        std::fs::write(&tmp, value)?;
        if let Err(err) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err.into());
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
