//! Key-value persistence for client-side state.
//!
//! Each value is an opaque string stored under a fixed key. Writes replace the
//! whole value in one step so readers never observe a half-written blob.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const KEYRING_SERVICE: &str = "parlor";

#[derive(Debug)]
pub enum StorageError {
    /// Reading the stored value failed.
    Read { key: String, source: io::Error },

    /// Writing the value failed (permissions, full disk, quota).
    Write { key: String, source: io::Error },

    /// The platform keyring rejected the operation.
    Keyring {
        key: String,
        source: keyring::Error,
    },

    /// The value could not be encoded for storage.
    Encode(serde_json::Error),

    /// The store refuses writes (memory-only or simulated failure).
    Unavailable(String),
}

impl StorageError {
    /// True when the backend was temporarily unreachable, as opposed to a
    /// problem with the stored data itself.
    pub fn is_recoverable(&self) -> bool {
        match self {
            StorageError::Keyring { source, .. } => matches!(
                source,
                keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_)
            ),
            StorageError::Read { .. } | StorageError::Write { .. } => true,
            StorageError::Encode(_) | StorageError::Unavailable(_) => false,
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Read { key, source } => write!(f, "failed to read '{key}': {source}"),
            StorageError::Write { key, source } => write!(f, "failed to write '{key}': {source}"),
            StorageError::Keyring { key, source } => {
                write!(f, "keyring error for '{key}': {source}")
            }
            StorageError::Encode(source) => write!(f, "failed to encode value: {source}"),
            StorageError::Unavailable(reason) => write!(f, "storage unavailable: {reason}"),
        }
    }
}

impl StdError for StorageError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            StorageError::Read { source, .. } | StorageError::Write { source, .. } => Some(source),
            StorageError::Keyring { source, .. } => Some(source),
            StorageError::Encode(source) => Some(source),
            StorageError::Unavailable(_) => None,
        }
    }
}

pub trait KeyValueStore: Send + Sync {
    /// `Ok(None)` when nothing has been stored under `key`.
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value under `key` in a single write.
    fn save(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// One JSON file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in the platform data directory, if one can be determined.
    pub fn default_location() -> Option<Self> {
        ProjectDirs::from("org", "parlor", "parlor").map(|dirs| Self::new(dirs.data_dir()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_stem: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_stem}.json"))
    }

    fn write_atomically(&self, path: &Path, value: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut temp_file = NamedTempFile::new_in(&self.dir)?;
        temp_file.write_all(value.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file.persist(path).map_err(|err| err.error)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        self.write_atomically(&path, value)
            .map_err(|source| StorageError::Write {
                key: key.to_string(),
                source,
            })
    }
}

/// Values kept in the operating system keyring, one entry per key.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(&self.service, key).map_err(|source| StorageError::Keyring {
            key: key.to_string(),
            source,
        })
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyValueStore for KeyringStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(source) => Err(StorageError::Keyring {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|source| StorageError::Keyring {
                key: key.to_string(),
                source,
            })
    }
}

/// The OS keyring when it answers a read of `probe_key`, else files in the
/// platform data directory, else memory.
pub fn platform_store(probe_key: &str) -> Arc<dyn KeyValueStore> {
    let keyring = KeyringStore::default();
    match keyring.load(probe_key) {
        Ok(_) => {
            debug!(service = %keyring.service, "Using OS keyring for client storage");
            return Arc::new(keyring);
        }
        Err(err) => warn!(error = %err, "OS keyring unavailable; falling back to files"),
    }
    match FileStore::default_location() {
        Some(store) => {
            debug!(dir = %store.dir().display(), "Using file storage");
            Arc::new(store)
        }
        None => {
            warn!("No data directory available; client storage is memory-only");
            Arc::new(MemoryStore::new())
        }
    }
}

/// In-process store. Writes can be made to fail to model an exhausted quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.get(key))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "quota exceeded while writing '{key}'"
            )));
        }
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
