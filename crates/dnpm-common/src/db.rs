//! File-backed JSON key-value db.
//!
//! Holds small pieces of durable state (global environment values,
//! auto-update settings). Every mutation rewrites the whole file through
//! [`write_atomic`], so readers never observe a partial document.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{DnpmError, Result};

/// Writes `contents` to `path` through a temporary file in the same
/// directory and an atomic rename. On failure the previous file, if any,
/// is left untouched.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the temporary
/// file cannot be written or persisted.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| DnpmError::io(parent, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| DnpmError::io(parent, e))?;
    tmp.write_all(contents).map_err(|e| DnpmError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| DnpmError::io(tmp.path(), e))?;
    let _ = tmp.persist(path).map_err(|e| DnpmError::io(path, e.error))?;
    Ok(())
}

/// JSON document of string keys to arbitrary values.
#[derive(Debug)]
pub struct JsonDb {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, serde_json::Value>>,
}

impl JsonDb {
    /// Opens the db at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| DnpmError::io(&path, e))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened db");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Reads a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(Into::into)
    }

    /// Stores a value and flushes the whole db to disk before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized or the file
    /// cannot be written. The in-memory state is only updated once the
    /// write succeeded.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = entries.clone();
        let _ = next.insert(key.to_string(), value);
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    /// Removes a key, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(key) {
            return Ok(false);
        }
        let mut next = entries.clone();
        let _ = next.remove(key);
        self.flush(&next)?;
        *entries = next;
        Ok(true)
    }

    /// Returns a snapshot of every entry.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<String, serde_json::Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, serde_json::Value>) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)?;
        write_atomic(&self.path, &json)
    }
}
