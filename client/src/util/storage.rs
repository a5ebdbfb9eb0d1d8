//! Key-value storage capability for persisted conversation snapshots.
//!
//! SYSTEM CONTEXT
//! ==============
//! The session never touches `localStorage` directly. It is handed a
//! [`KeyValueStore`]: [`BrowserStorage`] in the browser build, or
//! [`MemoryStore`] natively and in tests. Every operation is fallible so
//! quota errors and disabled storage surface as values, not panics.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable")]
    Unavailable,
    #[error("storage read failed: {0}")]
    Read(String),
    #[error("storage write failed: {0}")]
    Write(String),
    #[error("stored value is malformed: {0}")]
    Malformed(String),
}

/// Minimal string key-value store.
pub trait KeyValueStore {
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns [`StorageError`] if the value cannot be written (e.g. quota).
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend rejects the removal.
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

/// Load a JSON value for `key`. `Ok(None)` when the key is absent.
///
/// # Errors
///
/// Returns the backend error, or [`StorageError::Malformed`] when the stored
/// text is not valid JSON for `T`.
pub fn load_json<T: DeserializeOwned>(store: &impl KeyValueStore, key: &str) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Malformed(e.to_string()))
}

/// Save `value` as JSON under `key`.
///
/// # Errors
///
/// Returns the backend error when the write fails.
pub fn save_json<T: Serialize>(store: &mut impl KeyValueStore, key: &str, value: &T) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Write(e.to_string()))?;
    store.set(key, &raw)
}

// =============================================================================
// MEMORY
// =============================================================================

/// In-process store. Can be told to fail upcoming writes to exercise the
/// session's degraded-persistence path.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    fail_writes: u32,
    fail_reads: bool,
    writes: u32,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with one raw entry.
    #[must_use]
    pub fn with_entry(key: &str, raw: &str) -> Self {
        let mut store = Self::new();
        store.entries.insert(key.to_owned(), raw.to_owned());
        store
    }

    /// Fail the next `count` calls to `set` or `remove`.
    pub fn fail_next_writes(&mut self, count: u32) {
        self.fail_writes = count;
    }

    pub fn fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Raw stored value, bypassing failure injection.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of write attempts (`set` and `remove`), failed ones included.
    #[must_use]
    pub fn write_attempts(&self) -> u32 {
        self.writes
    }

    fn take_write_failure(&mut self) -> bool {
        self.writes += 1;
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return true;
        }
        false
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads {
            return Err(StorageError::Read("injected".into()));
        }
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.take_write_failure() {
            return Err(StorageError::Write("quota exceeded".into()));
        }
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        if self.take_write_failure() {
            return Err(StorageError::Write("remove rejected".into()));
        }
        self.entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// BROWSER
// =============================================================================

/// `window.localStorage`.
#[cfg(feature = "csr")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserStorage;

#[cfg(feature = "csr")]
impl BrowserStorage {
    fn storage() -> Result<web_sys::Storage, StorageError> {
        web_sys::window()
            .and_then(|w| w.local_storage().ok().flatten())
            .ok_or(StorageError::Unavailable)
    }
}

#[cfg(feature = "csr")]
impl KeyValueStore for BrowserStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Self::storage()?
            .get_item(key)
            .map_err(|e| StorageError::Read(format!("{e:?}")))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::storage()?
            .set_item(key, value)
            .map_err(|e| StorageError::Write(format!("{e:?}")))
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        Self::storage()?
            .remove_item(key)
            .map_err(|e| StorageError::Write(format!("{e:?}")))
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
