//! ACID-durable generation cache backed by redb.
//!
//! Keys are caller-built strings (`commentary11_chapter-3`, an image prompt, ...).
//! Values are opaque bytes; typed helpers serialize through `serde_json`.
//! Nothing expires: stale entries are retired by versioning the key.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use redb::{Database, ReadableTableMetadata, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{CacheError, CacheResult};

/// Single table holding every memoized generation.
const GENERATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("generations");

/// Hit/miss counters for the lifetime of one open store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Durable key → value store used to memoize remote calls.
///
/// redb serializes write transactions internally, so a single `CacheStore`
/// can be shared by reference across worker threads.
pub struct CacheStore {
    db: Database,
    path: PathBuf,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    /// Open or create the cache database at `path`.
    ///
    /// Failure here is fatal for the caller: there is no in-memory fallback.
    pub fn open(path: &Path) -> CacheResult<Self> {
        let unavailable = |message: String| CacheError::Unavailable {
            path: path.display().to_string(),
            message,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }
        let db = Database::create(path).map_err(|e| unavailable(e.to_string()))?;

        // Create the table up front so read transactions never see it missing.
        let txn = db.begin_write().map_err(|e| unavailable(e.to_string()))?;
        txn.open_table(GENERATIONS)
            .map_err(|e| unavailable(e.to_string()))?;
        txn.commit().map_err(|e| unavailable(e.to_string()))?;

        tracing::debug!(path = %path.display(), "opened generation cache");
        Ok(Self {
            db,
            path: path.to_path_buf(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Read raw bytes by key. Returns `Ok(None)` if the key doesn't exist.
    pub fn get_raw(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(|e| CacheError::Redb {
            message: format!("begin_read failed: {e}"),
        })?;
        let table = txn.open_table(GENERATIONS).map_err(|e| CacheError::Redb {
            message: format!("open_table failed: {e}"),
        })?;
        let result = table.get(key).map_err(|e| CacheError::Redb {
            message: format!("get failed: {e}"),
        })?;
        Ok(result.map(|guard| guard.value().to_vec()))
    }

    /// Store raw bytes under `key`, overwriting any previous value.
    pub fn put_raw(&self, key: &str, value: &[u8]) -> CacheResult<()> {
        let txn = self.db.begin_write().map_err(|e| CacheError::Redb {
            message: format!("begin_write failed: {e}"),
        })?;
        {
            let mut table = txn.open_table(GENERATIONS).map_err(|e| CacheError::Redb {
                message: format!("open_table failed: {e}"),
            })?;
            table.insert(key, value).map_err(|e| CacheError::Redb {
                message: format!("insert failed: {e}"),
            })?;
        }
        txn.commit().map_err(|e| CacheError::Redb {
            message: format!("commit failed: {e}"),
        })?;
        Ok(())
    }

    /// Read and deserialize a JSON-encoded value.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_raw(key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Serde {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Serialize a value as JSON and store it.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> CacheResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::Serde {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.put_raw(key, &bytes)
    }

    /// Whether `key` has a stored value.
    pub fn contains(&self, key: &str) -> CacheResult<bool> {
        self.get_raw(key).map(|v| v.is_some())
    }

    /// Return the cached value for `key`, or run `produce` and store its result.
    ///
    /// Failures from `produce` are returned as-is and nothing is stored.
    pub fn memoize<T, E, F>(&self, key: &str, produce: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(hit) = self.get(key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "cache hit");
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = produce()?;
        self.put(key, &value)?;
        Ok(value)
    }

    /// Byte-valued variant of [`memoize`](Self::memoize), used for images.
    pub fn memoize_bytes<E, F>(&self, key: &str, produce: F) -> Result<Vec<u8>, E>
    where
        E: From<CacheError>,
        F: FnOnce() -> Result<Vec<u8>, E>,
    {
        if let Some(hit) = self.get_raw(key)? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, bytes = hit.len(), "cache hit");
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = produce()?;
        self.put_raw(key, &value)?;
        Ok(value)
    }

    /// Number of stored entries.
    pub fn len(&self) -> CacheResult<u64> {
        let txn = self.db.begin_read().map_err(|e| CacheError::Redb {
            message: format!("begin_read failed: {e}"),
        })?;
        let table = txn.open_table(GENERATIONS).map_err(|e| CacheError::Redb {
            message: format!("open_table failed: {e}"),
        })?;
        table.len().map_err(|e| CacheError::Redb {
            message: format!("len failed: {e}"),
        })
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> CacheResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// Hit/miss counters since this store was opened.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the store. Every write is already committed; this releases the file lock.
    pub fn close(self) {
        let stats = self.stats();
        tracing::info!(
            path = %self.path.display(),
            hits = stats.hits,
            misses = stats.misses,
            "closing generation cache"
        );
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("path", &self.path)
            .finish()
    }
}
