//! Cache-mediated connection to the remote blob store
//!
//! For each requested identifier the connection applies the [`CacheRule`],
//! answers cacheable requests from the disk cache when it holds the blob, and
//! populates the cache from the remote store on a miss.
//!
//! The contains-check and the population that follows it are separate steps.
//! Two concurrent requests for the same uncached blob may both read it
//! remotely and both write the entry; each write is published by an atomic
//! rename of equivalent content, so the outcome is a wasted remote read, never
//! a torn or mixed entry.
//!
//! Writes go through the same store-wide registry as fills: no entry is
//! filled while the blob is being written, and a fill that overlapped a write
//! is dropped again after publishing.

use crate::adapter::{BlobCacheAdapter, Binding};
use crate::blob::Blob;
use crate::error::{BlobStoreError, Result};
use crate::id::BlobId;
use crate::remote::{BlobReader, BlobWriter, RemoteStore};
use crate::rule::CacheRule;
use crate::writes::InFlightWrites;
use file_blob_cache::{CacheStats, DiskCache};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Free-form per-call hints; accepted for protocol compatibility and unused
pub type Hints = HashMap<String, String>;

pub struct CachedConnection {
    endpoint: Url,
    store: Arc<dyn RemoteStore>,
    rule: CacheRule,
    cache: DiskCache,
    writes: InFlightWrites,
    adapter: BlobCacheAdapter,
    closed: Arc<AtomicBool>,
}

impl CachedConnection {
    pub(crate) fn new(
        endpoint: Url,
        store: Arc<dyn RemoteStore>,
        cache: DiskCache,
        writes: InFlightWrites,
        rule: CacheRule,
    ) -> Self {
        Self {
            endpoint,
            store,
            rule,
            cache,
            writes,
            adapter: BlobCacheAdapter::new(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Endpoint of the remote store this connection talks to
    pub fn store_id(&self) -> &Url {
        &self.endpoint
    }

    pub fn rule(&self) -> &CacheRule {
        &self.rule
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection. Blobs obtained from it stop working as well.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(endpoint = %self.endpoint, "Connection closed");
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.adapter.is_bound()
    }

    /// Get a handle on the blob named `id`, or on a new blob with a freshly
    /// minted identifier when `id` is `None`.
    pub async fn get_blob(&self, id: Option<&BlobId>, _hints: &Hints) -> Result<Blob> {
        self.ensure_open()?;

        let Some(id) = id else {
            let id = BlobId::mint(&self.endpoint)?;
            debug!(id = %id, "Creating new blob id");
            return Ok(Blob::remote(id, self.bind().await?));
        };

        debug!(id = %id, "Fetching blob");
        self.check_scheme(id)?;

        let blob = Blob::remote(id.clone(), self.bind().await?);
        if !self.rule.matches(id) {
            return Ok(blob);
        }

        if self.cache.contains(id.as_str()).await {
            if let Some(cached) = self.cache.get(id.as_str(), &self.adapter).await {
                return Ok(cached);
            }
            debug!(id = %id, "Cache entry vanished before it could be read");
        }

        self.populate(blob).await
    }

    /// Open `blob` for reading through this connection
    pub async fn open_input_stream(&self, blob: &Blob) -> Result<BlobReader> {
        self.ensure_open()?;
        blob.open_input_stream().await
    }

    /// Open the blob named `id` for writing in the remote store.
    ///
    /// Unlike going through [`get_blob`](Self::get_blob), this never fills
    /// the cache with the content about to be replaced.
    pub async fn open_output_stream(&self, id: &BlobId, overwrite: bool) -> Result<BlobWriter> {
        self.ensure_open()?;
        self.check_scheme(id)?;
        Blob::remote(id.clone(), self.bind().await?)
            .open_output_stream(overwrite)
            .await
    }

    /// Invalidate the cached copy of `blob`, then delete it remotely
    pub async fn delete(&self, blob: &Blob) -> Result<()> {
        self.ensure_open()?;
        blob.delete().await
    }

    /// Identifiers present in the remote store, optionally filtered by prefix
    pub async fn list_blob_ids(&self, prefix: Option<&str>) -> Result<Vec<BlobId>> {
        self.ensure_open()?;
        let binding = self.bind().await?;
        Ok(binding.handle.list(prefix).await?)
    }

    fn check_scheme(&self, id: &BlobId) -> Result<()> {
        if id.scheme() != self.endpoint.scheme() {
            return Err(BlobStoreError::UnsupportedId {
                id: id.to_string(),
                reason: format!(
                    "identifiers for this store have to start with '{}:'",
                    self.endpoint.scheme()
                ),
            });
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BlobStoreError::IllegalState(
                "Connection to remote store is closed".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the remote handle and bind it into the adapter, once
    async fn bind(&self) -> Result<Arc<Binding>> {
        self.adapter
            .bind(|| async {
                let handle = self.store.resolve_handle(&self.endpoint).await?;
                debug!(endpoint = %self.endpoint, "Bound remote handle");
                Ok::<_, BlobStoreError>(Arc::new(Binding {
                    handle,
                    cache: self.cache.clone(),
                    writes: self.writes.clone(),
                    closed: self.closed.clone(),
                }))
            })
            .await
    }

    /// Copy a remote blob into the cache and hand out the cached handle.
    ///
    /// Falls back to the remote handle when the blob does not exist remotely,
    /// is being written, or the copy fails.
    async fn populate(&self, blob: Blob) -> Result<Blob> {
        let key = blob.id().as_str();
        let Some(fill) = self.writes.start_fill(key) else {
            debug!(id = %blob.id(), "Blob is being written, not caching");
            return Ok(blob);
        };

        if !blob.exists().await? {
            debug!(id = %blob.id(), "Blob not in remote store, nothing to cache");
            return Ok(blob);
        }

        match self.cache.put(key, &blob, &self.adapter).await {
            Ok(size) => debug!(id = %blob.id(), size, "Populated cache entry"),
            Err(e) => {
                warn!(id = %blob.id(), error = %e, "Cache population failed, serving from remote store");
                return Ok(blob);
            }
        }

        if fill.is_stale() {
            debug!(id = %blob.id(), "Blob was written while caching, dropping entry");
            self.cache.invalidate(key).await?;
            return Ok(blob);
        }
        drop(fill);

        Ok(match self.cache.get(key, &self.adapter).await {
            Some(cached) => cached,
            None => blob,
        })
    }
}
