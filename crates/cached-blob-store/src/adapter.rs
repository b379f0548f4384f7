//! Bridge between blob streams and the disk cache's storage hooks

use crate::blob::Blob;
use crate::error::{BlobStoreError, Result};
use crate::id::BlobId;
use crate::remote::RemoteHandle;
use crate::writes::InFlightWrites;
use async_trait::async_trait;
use file_blob_cache::{CacheHooks, DiskCache};
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::OnceCell;
use tracing::warn;

/// What every blob handed out by a connection shares with it: the resolved
/// remote handle, the store's cache and write registry, and the connection's
/// closed flag.
pub(crate) struct Binding {
    pub(crate) handle: Arc<dyn RemoteHandle>,
    pub(crate) cache: DiskCache,
    pub(crate) writes: InFlightWrites,
    pub(crate) closed: Arc<AtomicBool>,
}

impl Binding {
    pub(crate) fn ensure_open(&self, action: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BlobStoreError::IllegalState(format!(
                "Unable to {}, because connection is closed",
                action
            )));
        }
        Ok(())
    }

    /// Invalidate the cache entry, then delete remotely. The entry stays
    /// invalidated when the remote delete fails.
    pub(crate) async fn delete(&self, id: &BlobId) -> Result<()> {
        self.ensure_open("delete blob")?;
        self.cache.invalidate(id.as_str()).await?;
        self.handle
            .delete(id)
            .await
            .map_err(|e| BlobStoreError::from_remote(id, e))
    }
}

/// [`CacheHooks`] implementation storing blob content on disk and
/// materializing cache entries back into [`Blob`] handles.
///
/// The binding is set once by the owning connection on first use.
#[derive(Default)]
pub struct BlobCacheAdapter {
    binding: OnceCell<Arc<Binding>>,
}

impl BlobCacheAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.initialized()
    }

    /// Bind on first call; concurrent callers wait for the same initialization
    pub(crate) async fn bind<F, Fut>(&self, init: F) -> Result<Arc<Binding>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<Binding>>>,
    {
        self.binding.get_or_try_init(init).await.cloned()
    }
}

#[async_trait]
impl CacheHooks for BlobCacheAdapter {
    type Value = Blob;

    async fn to_disk(
        &self,
        key: &str,
        blob: &Blob,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> io::Result<u64> {
        let mut reader = blob.open_input_stream().await.map_err(|e| {
            warn!(key, error = %e, "Could not open blob for caching");
            io::Error::from(e)
        })?;
        tokio::io::copy(&mut reader, sink).await
    }

    fn from_disk(&self, key: &str, _path: &Path) -> Option<Blob> {
        let Some(binding) = self.binding.get() else {
            warn!(key, "Cache adapter used before the connection bound it");
            return None;
        };

        match BlobId::parse(key) {
            Ok(id) => Some(Blob::cached(id, binding.clone())),
            Err(e) => {
                warn!(key, error = %e, "Cache key is not a blob identifier");
                None
            }
        }
    }
}
