//! File-based blob caching with in-memory metadata

use crate::error::{CacheError, Result};
use crate::hooks::CacheHooks;
use crate::types::{CacheEntry, CacheStats};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A string-keyed disk cache with in-memory metadata and file-based storage.
///
/// The index is keyed by on-disk file name, so it can be rebuilt from the
/// cache directory alone. Cloning is cheap and yields a handle onto the same
/// cache.
#[derive(Clone)]
pub struct DiskCache {
    /// In-memory metadata for cached entries, by file name
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    /// Directory where cached blobs are stored
    cache_dir: PathBuf,
    /// Maximum cache size in bytes
    max_size: u64,
    /// Current total size of cached blobs. Only changed while holding the
    /// `entries` write lock.
    current_size: Arc<AtomicU64>,
    /// Cache hit counter
    hits: Arc<AtomicU64>,
    /// Cache miss counter
    misses: Arc<AtomicU64>,
    /// Entries dropped to stay under `max_size`
    evictions: Arc<AtomicU64>,
}

impl DiskCache {
    /// Create a new disk cache
    pub fn new(cache_dir: PathBuf, max_size: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            cache_dir,
            max_size,
            current_size: Arc::new(AtomicU64::new(0)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Initialize the cache: create the directory, index the entries already
    /// in it and evict down to `max_size`.
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        let indexed = self.rebuild_index().await?;
        self.evict_if_needed(0).await;

        info!(
            cache_dir = ?self.cache_dir,
            max_size = self.max_size,
            indexed,
            "Cache initialized"
        );
        Ok(())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// File name used on disk for a key
    pub fn file_name(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Location of the entry for `key`, whether or not it exists
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.cache_dir.join(Self::file_name(key))
    }

    /// Whether a complete entry for `key` is present on disk
    pub async fn contains(&self, key: &str) -> bool {
        self.lookup(key).await.is_some()
    }

    /// Materialize the entry for `key` through `hooks`
    pub async fn get<H: CacheHooks>(&self, key: &str, hooks: &H) -> Option<H::Value> {
        let Some(entry) = self.lookup(key).await else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache miss");
            return None;
        };

        self.touch(&Self::file_name(key)).await;

        match hooks.from_disk(key, &entry.path) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                warn!(key, path = ?entry.path, "Cache entry could not be materialized");
                None
            }
        }
    }

    /// Store `value` under `key` through `hooks`, returning the entry size.
    ///
    /// The hook writes into a temporary file which is only renamed into place
    /// after the hook succeeded. Concurrent puts of the same key each write
    /// their own temporary file; the last rename wins.
    pub async fn put<H: CacheHooks>(&self, key: &str, value: &H::Value, hooks: &H) -> Result<u64> {
        let name = Self::file_name(key);
        let path = self.cache_dir.join(&name);
        let tmp = Self::temp_path(&path);

        let mut file = fs::File::create(&tmp).await?;
        let written = match hooks.to_disk(key, value, &mut file).await {
            Ok(written) => written,
            Err(e) => {
                drop(file);
                Self::discard(&tmp).await;
                warn!(key, error = %e, "Failed to populate cache entry");
                return Err(CacheError::Populate {
                    key: key.to_string(),
                    source: e,
                });
            }
        };
        if let Err(e) = file.flush().await {
            drop(file);
            Self::discard(&tmp).await;
            return Err(e.into());
        }
        drop(file);

        // Evict entries if needed to make room
        self.evict_if_needed(written).await;

        if let Err(e) = fs::rename(&tmp, &path).await {
            Self::discard(&tmp).await;
            return Err(e.into());
        }

        {
            let mut entries = self.entries.write().await;
            if let Some(previous) = entries.insert(name, CacheEntry::new(path, written)) {
                self.current_size.fetch_sub(previous.size, Ordering::Relaxed);
            }
            self.current_size.fetch_add(written, Ordering::Relaxed);
        }

        debug!(key, size = written, "Cached blob");
        Ok(written)
    }

    /// Remove the entry for `key`. Returns whether anything was removed.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let indexed = self.forget(&Self::file_name(key)).await;
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => {
                debug!(key, "Invalidated cache entry");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(indexed),
            Err(e) => Err(e.into()),
        }
    }

    /// Open the entry for `key` for reading; `None` when there is no entry.
    pub async fn open(&self, key: &str) -> Result<Option<fs::File>> {
        match fs::File::open(self.path_for(key)).await {
            Ok(file) => {
                self.touch(&Self::file_name(key)).await;
                Ok(Some(file))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get current cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            entries: entries.len(),
            total_size: self.current_size.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Index every entry file in the cache directory. Temporary files and
    /// anything else not named like an entry are skipped.
    async fn rebuild_index(&self) -> Result<usize> {
        let mut found = Vec::new();
        let mut dir = fs::read_dir(&self.cache_dir).await?;
        while let Some(item) = dir.next_entry().await? {
            let Ok(name) = item.file_name().into_string() else {
                continue;
            };
            if !Self::is_entry_name(&name) {
                continue;
            }
            let meta = match item.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };

            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            found.push((
                name,
                CacheEntry {
                    path: item.path(),
                    size: meta.len(),
                    created_at: modified,
                    last_access: modified,
                },
            ));
        }

        let mut entries = self.entries.write().await;
        let mut indexed = 0;
        for (name, entry) in found {
            if entries.contains_key(&name) {
                continue;
            }
            self.current_size.fetch_add(entry.size, Ordering::Relaxed);
            entries.insert(name, entry);
            indexed += 1;
        }
        Ok(indexed)
    }

    fn is_entry_name(name: &str) -> bool {
        name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit())
    }

    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let name = Self::file_name(key);
        let indexed = {
            let entries = self.entries.read().await;
            entries.get(&name).cloned()
        };

        match indexed {
            Some(entry) => {
                if fs::metadata(&entry.path).await.is_ok() {
                    return Some(entry);
                }
                debug!(key, "Cached file disappeared, dropping entry");
                self.forget(&name).await;
                None
            }
            None => self.adopt(key, name).await,
        }
    }

    /// Index a file that appeared under the cache root after `init`, e.g.
    /// one written by another cache instance on the same directory.
    async fn adopt(&self, key: &str, name: String) -> Option<CacheEntry> {
        let path = self.cache_dir.join(&name);
        let meta = fs::metadata(&path).await.ok()?;
        if !meta.is_file() {
            return None;
        }

        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&name) {
            return Some(existing.clone());
        }
        let entry = CacheEntry::new(path, meta.len());
        self.current_size.fetch_add(entry.size, Ordering::Relaxed);
        entries.insert(name, entry.clone());
        debug!(key, size = entry.size, "Adopted cache file from disk");
        Some(entry)
    }

    async fn touch(&self, name: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(name) {
            entry.last_access = Utc::now();
        }
    }

    /// Drop the metadata for file `name`, leaving the file alone
    async fn forget(&self, name: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.remove(name) {
            Some(entry) => {
                self.current_size.fetch_sub(entry.size, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Evict least recently used entries until there's enough room for new_size bytes
    async fn evict_if_needed(&self, new_size: u64) {
        let current = self.current_size.load(Ordering::Relaxed);

        if current.saturating_add(new_size) <= self.max_size {
            return;
        }

        let target_size = self.max_size.saturating_sub(new_size);

        loop {
            let current = self.current_size.load(Ordering::Relaxed);
            if current <= target_size {
                break;
            }

            let oldest = {
                let entries = self.entries.read().await;
                entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_access)
                    .map(|(name, e)| (name.clone(), e.path.clone()))
            };

            if let Some((name, path)) = oldest {
                self.forget(&name).await;
                // Try to remove the file (ignore errors)
                let _ = fs::remove_file(&path).await;
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(file = %name, "Evicted least recently used cache entry");
            } else {
                break;
            }
        }
    }

    fn temp_path(path: &Path) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        path.with_extension(format!("{}.{}.tmp", std::process::id(), seq))
    }

    async fn discard(tmp: &Path) {
        if let Err(e) = fs::remove_file(tmp).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = ?tmp, error = %e, "Failed to remove temporary cache file");
            }
        }
    }
}
