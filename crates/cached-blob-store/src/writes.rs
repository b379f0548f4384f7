//! Bookkeeping that keeps half-written blobs out of the cache
//!
//! A writer registers its key for as long as its output stream is open. Cache
//! fills check in before reading the remote blob and check out after the
//! entry is published: a fill is refused while a write is in flight, and a
//! fill that overlapped the start or end of a write reports itself stale so
//! the caller can drop the entry it just published.

use crate::remote::BlobWriter;
use file_blob_cache::DiskCache;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{ready, Context, Poll};
use tokio::io::AsyncWrite;

#[derive(Default)]
struct KeyState {
    writers: usize,
    fills: usize,
    generation: u64,
}

/// Shared by every connection of a store
#[derive(Clone, Default)]
pub(crate) struct InFlightWrites {
    keys: Arc<Mutex<HashMap<String, KeyState>>>,
}

impl InFlightWrites {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
        // The map stays consistent even if a holder panicked
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a write to `key` until the returned guard is dropped
    pub(crate) fn start_write(&self, key: &str) -> WriteGuard {
        let mut keys = self.lock();
        let state = keys.entry(key.to_string()).or_default();
        state.writers += 1;
        state.generation += 1;

        WriteGuard {
            writes: self.clone(),
            key: key.to_string(),
        }
    }

    /// Register a cache fill for `key`; `None` while `key` is being written
    pub(crate) fn start_fill(&self, key: &str) -> Option<FillGuard> {
        let mut keys = self.lock();
        let state = keys.entry(key.to_string()).or_default();
        if state.writers > 0 {
            return None;
        }
        state.fills += 1;

        Some(FillGuard {
            writes: self.clone(),
            key: key.to_string(),
            generation: state.generation,
        })
    }

    fn finish(&self, key: &str, update: impl FnOnce(&mut KeyState)) {
        let mut keys = self.lock();
        if let Some(state) = keys.get_mut(key) {
            update(state);
            if state.writers == 0 && state.fills == 0 {
                keys.remove(key);
            }
        }
    }
}

pub(crate) struct WriteGuard {
    writes: InFlightWrites,
    key: String,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        self.writes.finish(&self.key, |state| {
            state.writers -= 1;
            state.generation += 1;
        });
    }
}

pub(crate) struct FillGuard {
    writes: InFlightWrites,
    key: String,
    generation: u64,
}

impl FillGuard {
    /// Whether a write to the key started or finished since the fill began
    pub(crate) fn is_stale(&self) -> bool {
        let keys = self.writes.lock();
        keys.get(&self.key)
            .is_some_and(|state| state.writers > 0 || state.generation != self.generation)
    }
}

impl Drop for FillGuard {
    fn drop(&mut self) {
        self.writes.finish(&self.key, |state| state.fills -= 1);
    }
}

type Invalidation = Pin<Box<dyn Future<Output = file_blob_cache::Result<bool>> + Send>>;

enum Finish {
    Open,
    Invalidating(Invalidation),
    Done,
}

/// Remote output stream that drops the cache entry for its blob once the
/// remote write is complete, and keeps fills away while it is open.
pub(crate) struct InvalidatingWriter {
    inner: BlobWriter,
    cache: DiskCache,
    key: String,
    guard: Option<WriteGuard>,
    finish: Finish,
}

impl InvalidatingWriter {
    pub(crate) fn new(inner: BlobWriter, cache: DiskCache, key: String, guard: WriteGuard) -> Self {
        Self {
            inner,
            cache,
            key,
            guard: Some(guard),
            finish: Finish::Open,
        }
    }
}

impl AsyncWrite for InvalidatingWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().inner.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().inner.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.finish {
                Finish::Open => {
                    ready!(this.inner.as_mut().poll_shutdown(cx))?;
                    let cache = this.cache.clone();
                    let key = this.key.clone();
                    this.finish =
                        Finish::Invalidating(Box::pin(async move { cache.invalidate(&key).await }));
                }
                Finish::Invalidating(invalidation) => {
                    let result = ready!(invalidation.as_mut().poll(cx));
                    this.finish = Finish::Done;
                    this.guard.take();
                    return Poll::Ready(result.map(|_| ()).map_err(io::Error::other));
                }
                Finish::Done => return Poll::Ready(Ok(())),
            }
        }
    }
}
