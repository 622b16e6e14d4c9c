//! Focus session storage
//!
//! Sessions live as one JSON array under a single key of a small key-value
//! blob store, newest first:
//! - File backend: <data dir>/FocusSessions.json
//! - Memory backend: for tests and embedding
//!
//! A missing key reads as an empty collection.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::session::Session;

/// Key the session collection is stored under
pub const SESSIONS_KEY: &str = "@FocusSessions";

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create store directory {path}: {source}")]
    Init {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read '{key}': {source}")]
    Read {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: io::Error,
    },

    #[error("Data stored under '{key}' is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize sessions: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// String blobs addressed by key
pub trait BlobStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// One file per key inside a directory
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    pub fn new(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Init {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// File backing a key; characters unsafe in file names are dropped
    fn key_path(&self, key: &str) -> PathBuf {
        let mut name: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if name.is_empty() {
            name.push('_');
        }
        self.dir.join(format!("{}.json", name))
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.key_path(key);
        let tmp = path.with_extension("json.tmp");
        let write_err = |source| StoreError::Write {
            key: key.to_string(),
            source,
        };

        fs::write(&tmp, value).map_err(write_err)?;
        fs::rename(&tmp, &path).map_err(write_err)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Write {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// In-process blobs
#[derive(Default)]
pub struct MemoryBlobStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// Append-only session collection
#[derive(Clone)]
pub struct SessionStore {
    blobs: Arc<dyn BlobStore>,
    /// Serializes read-modify-write appends
    write_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store backed by files in `data_dir`
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(Arc::new(FileBlobStore::new(data_dir)?)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBlobStore::new()))
    }

    /// Add a session in front of the existing ones.
    ///
    /// A corrupt collection is left untouched and reported instead of being
    /// overwritten.
    pub fn append(&self, session: &Session) -> Result<(), StoreError> {
        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut sessions = self.get_all()?;
        sessions.insert(0, session.clone());

        let content = serde_json::to_string(&sessions)?;
        self.blobs.set(SESSIONS_KEY, &content)?;
        tracing::debug!(id = %session.id, total = sessions.len(), "session saved");
        Ok(())
    }

    /// All sessions, newest first
    pub fn get_all(&self) -> Result<Vec<Session>, StoreError> {
        let content = match self.blobs.get(SESSIONS_KEY)? {
            Some(content) if !content.trim().is_empty() => content,
            _ => return Ok(Vec::new()),
        };

        serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            key: SESSIONS_KEY.to_string(),
            source,
        })
    }

    /// All sessions, or an empty list if storage can't be read
    pub fn load_or_empty(&self) -> Vec<Session> {
        match self.get_all() {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "could not load sessions, showing none");
                Vec::new()
            }
        }
    }

    /// Remove every stored session
    pub fn clear(&self) -> Result<(), StoreError> {
        self.blobs.remove(SESSIONS_KEY)?;
        tracing::info!("all sessions cleared");
        Ok(())
    }
}
