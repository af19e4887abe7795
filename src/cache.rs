//! Match cache module
//!
//! This module persists which catalog entry a normalized folder key resolved
//! to, so re-runs and further volumes of the same series skip the network.
//! The whole cache is one pretty-printed JSON object keyed by normalized title,
//! loaded once and rewritten atomically after every change.

use crate::metadata_retrieval::MetadataRecord;
use crate::temp::sibling_temp_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the cache inside the data directory
pub const CACHE_FILE_NAME: &str = "manga_cache.json";

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to create or access cache directory
    #[error("Failed to create cache directory at {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read cached data
    #[error("Failed to read cache file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write cached data
    #[error("Failed to write cache file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The cache file exists but is not a valid cache
    #[error("Cache file {path} is corrupt: {source}")]
    CacheCorrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Failed to serialize data for caching
    #[error("Failed to serialize data: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// What a cache key resolved to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedMatch {
    /// A catalog entry was chosen for this key
    Resolved(MetadataRecord),
    /// The key was searched but nothing acceptable was chosen
    Unresolved,
}

/// One persisted cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub value: CachedMatch,
    pub stored_at: DateTime<Utc>,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(MetadataRecord),
    Unresolved,
    Absent,
}

/// Persistent key → match mapping backed by a single JSON file.
///
/// The cache is owned by exactly one writer (the resolution pipeline); it is
/// not shared between threads.
#[derive(Debug)]
pub struct MatchCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl MatchCache {
    /// Opens the cache file at `path`.
    ///
    /// A missing file yields an empty cache. A corrupt file is moved aside to
    /// `<name>.corrupt`, logged as a warning, and the cache starts empty.
    /// Only I/O failures other than "not found" are returned as errors.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();

        let entries = match Self::load_entries(&path) {
            Ok(entries) => entries,
            Err(CacheError::CacheCorrupt { path, source }) => {
                let backup = path.with_extension("json.corrupt");
                tracing::warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %source,
                    "cache file is corrupt, starting with an empty cache"
                );
                if let Err(e) = fs::rename(&path, &backup) {
                    tracing::warn!(error = %e, "could not move corrupt cache file aside");
                }
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "match cache loaded");
        Ok(Self { path, entries })
    }

    fn load_entries(path: &Path) -> Result<BTreeMap<String, CacheEntry>, CacheError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(CacheError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|e| CacheError::CacheCorrupt {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Looks up a normalized key
    pub fn lookup(&self, key: &str) -> CacheLookup {
        match self.entries.get(key).map(|entry| &entry.value) {
            Some(CachedMatch::Resolved(record)) => CacheLookup::Hit(record.clone()),
            Some(CachedMatch::Unresolved) => CacheLookup::Unresolved,
            None => CacheLookup::Absent,
        }
    }

    /// Stores a match for `key` and rewrites the cache file
    pub fn store(&mut self, key: &str, value: CachedMatch) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Utc::now(),
            },
        );
        self.flush_to_disk()
    }

    /// Removes a single key. Returns whether it was present.
    pub fn forget(&mut self, key: &str) -> Result<bool, CacheError> {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.flush_to_disk()?;
        }
        Ok(removed)
    }

    /// Removes every entry
    pub fn clear(&mut self) -> Result<usize, CacheError> {
        let count = self.entries.len();
        self.entries.clear();
        self.flush_to_disk()?;
        Ok(count)
    }

    /// Iterates over all entries in key order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the whole cache to disk via a temporary file and a rename.
    pub fn flush_to_disk(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CacheError::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let content = serde_json::to_string_pretty(&self.entries)?;

        let write_failed = |e| CacheError::WriteFailed {
            path: self.path.clone(),
            source: e,
        };
        let mut staged = sibling_temp_file(&self.path, "tmp").map_err(write_failed)?;
        fs::write(&*staged, content).map_err(write_failed)?;
        staged.persist(&self.path).map_err(write_failed)?;

        Ok(())
    }
}
