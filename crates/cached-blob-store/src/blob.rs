//! Blob handles

use crate::adapter::Binding;
use crate::error::{BlobStoreError, Result};
use crate::id::BlobId;
use crate::remote::{BlobReader, BlobWriter};
use crate::writes::InvalidatingWriter;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Where a blob handle reads its bytes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Straight from the remote store
    Remote,
    /// From the local cache entry, falling back to the remote store if the
    /// entry has gone away
    Cached,
}

/// A handle on one blob. Each `open_*` call returns a fresh stream.
#[derive(Clone)]
pub struct Blob {
    id: BlobId,
    origin: Origin,
    binding: Arc<Binding>,
}

impl Blob {
    pub(crate) fn remote(id: BlobId, binding: Arc<Binding>) -> Self {
        Self {
            id,
            origin: Origin::Remote,
            binding,
        }
    }

    pub(crate) fn cached(id: BlobId, binding: Arc<Binding>) -> Self {
        Self {
            id,
            origin: Origin::Cached,
            binding,
        }
    }

    pub fn id(&self) -> &BlobId {
        &self.id
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_cached(&self) -> bool {
        self.origin == Origin::Cached
    }

    /// Whether the blob can currently be read.
    ///
    /// A cached handle answers from the cache entry first and asks the
    /// remote store only if the entry is gone.
    pub async fn exists(&self) -> Result<bool> {
        self.binding.ensure_open("check blob existence")?;

        if self.is_cached() && self.binding.cache.contains(self.id.as_str()).await {
            return Ok(true);
        }

        self.binding
            .handle
            .exists(&self.id)
            .await
            .map_err(|e| BlobStoreError::from_remote(&self.id, e))
    }

    /// Open the blob for reading.
    ///
    /// Cached handles try the cache entry and fall back to the remote store
    /// when it is absent. An entry appearing between the two steps only costs
    /// a redundant remote read.
    pub async fn open_input_stream(&self) -> Result<BlobReader> {
        self.binding.ensure_open("open input stream")?;

        if self.is_cached() {
            if let Some(file) = self.binding.cache.open(self.id.as_str()).await? {
                debug!(id = %self.id, "Serving blob from cache");
                return Ok(Box::pin(file));
            }
            debug!(id = %self.id, "Cache entry gone, reading from remote store");
        }

        self.binding
            .handle
            .open(&self.id)
            .await
            .map_err(|e| BlobStoreError::from_remote(&self.id, e))
    }

    pub async fn size(&self) -> Result<u64> {
        self.binding.ensure_open("get blob size")?;

        if self.is_cached() {
            match fs::metadata(self.binding.cache.path_for(self.id.as_str())).await {
                Ok(meta) => return Ok(meta.len()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.binding
            .handle
            .size(&self.id)
            .await
            .map_err(|e| BlobStoreError::from_remote(&self.id, e))
    }

    /// Open the blob for writing in the remote store.
    ///
    /// Any cache entry is invalidated when the stream opens and again when it
    /// is shut down. While it is open the blob is not cached; the new content
    /// is cached when the blob is next fetched through a connection.
    pub async fn open_output_stream(&self, overwrite: bool) -> Result<BlobWriter> {
        self.binding.ensure_open("open output stream")?;

        let key = self.id.as_str();
        let guard = self.binding.writes.start_write(key);
        self.binding.cache.invalidate(key).await?;

        let inner = self
            .binding
            .handle
            .create(&self.id, overwrite)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => BlobStoreError::DuplicateBlob(self.id.to_string()),
                _ => BlobStoreError::from_remote(&self.id, e),
            })?;

        Ok(Box::pin(InvalidatingWriter::new(
            inner,
            self.binding.cache.clone(),
            key.to_string(),
            guard,
        )))
    }

    /// Remove the cache entry, then the remote blob
    pub async fn delete(&self) -> Result<()> {
        self.binding.delete(&self.id).await?;
        debug!(id = %self.id, "Deleted blob");
        Ok(())
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .finish()
    }
}
