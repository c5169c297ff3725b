//! Persistent user store: the single `neoUser` slot shared by the session
//! controller and the API client.
//!
//! DESIGN
//! ======
//! `FileUserStore` mirrors browser local storage: one JSON object of string
//! keys to string values, with the serialized user record under
//! [`USER_KEY`]. Writes go to a temp file that is renamed over the original,
//! so a crash mid-write never leaves a half-written entry behind.
//!
//! Clearing deletes the key outright. Older files may still hold the literal
//! `"null"` placeholder; reads treat it as absent.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::user::UserRecord;

/// Storage key holding the serialized user record.
pub const USER_KEY: &str = "neoUser";

const NULL_PLACEHOLDER: &str = "null";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {path} is not a JSON object: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize user record: {0}")]
    Serialize(#[from] serde_json::Error),
}

// =============================================================================
// CONTRACT
// =============================================================================

/// Synchronous key-value slot holding the last known user.
pub trait UserStore: Send + Sync {
    /// Load the stored user. A missing, placeholder, or unparsable entry is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be read.
    fn read(&self) -> Result<Option<UserRecord>, StoreError>;

    /// Replace the stored user with `user`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record cannot be serialized or written.
    fn write(&self, user: &UserRecord) -> Result<(), StoreError>;

    /// Remove the stored user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backing storage cannot be updated.
    fn clear(&self) -> Result<(), StoreError>;
}

fn parse_entry(raw: &str) -> Option<UserRecord> {
    if raw.trim() == NULL_PLACEHOLDER {
        return None;
    }
    match serde_json::from_str::<UserRecord>(raw) {
        Ok(user) => Some(user),
        Err(e) => {
            tracing::warn!(error = %e, "stored user entry is unreadable; treating as signed out");
            None
        }
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// File-backed store, the on-disk analog of browser local storage.
pub struct FileUserStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileUserStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io { path: self.path.clone(), source }
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt { path: self.path.clone(), source })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return match std::fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_err(e)),
            };
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let body = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(|e| self.io_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))
    }
}

impl UserStore for FileUserStore {
    fn read(&self) -> Result<Option<UserRecord>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries = match self.load() {
            Ok(entries) => entries,
            Err(StoreError::Corrupt { path, source }) => {
                tracing::warn!(path = %path.display(), error = %source, "storage file is corrupt; ignoring");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(entries.get(USER_KEY).map(String::as_str).and_then(parse_entry))
    }

    fn write(&self, user: &UserRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let serialized = serde_json::to_string(user)?;
        let mut entries = self.load().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "replacing unreadable storage file");
            BTreeMap::new()
        });
        entries.insert(USER_KEY.to_owned(), serialized);
        self.persist(&entries)?;
        tracing::debug!(path = %self.path.display(), "stored user record");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut entries = self.load().unwrap_or_default();
        entries.remove(USER_KEY);
        self.persist(&entries)?;
        tracing::debug!(path = %self.path.display(), "cleared user record");
        Ok(())
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-process store. Holds the serialized form so reads see exactly what a
/// file-backed store would return.
#[derive(Default)]
pub struct MemoryUserStore {
    entry: Mutex<Option<String>>,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the slot with a raw entry, as a previous process might have left it.
    #[must_use]
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self { entry: Mutex::new(Some(raw.into())) }
    }

    /// Raw serialized entry currently in the slot.
    #[must_use]
    pub fn raw(&self) -> Option<String> {
        self.entry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl UserStore for MemoryUserStore {
    fn read(&self) -> Result<Option<UserRecord>, StoreError> {
        let entry = self.entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(entry.as_deref().and_then(parse_entry))
    }

    fn write(&self, user: &UserRecord) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(user)?;
        *self.entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(serialized);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.entry.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }
}
