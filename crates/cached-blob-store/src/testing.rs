//! In-memory remote store that counts calls

use crate::id::BlobId;
use crate::remote::{BlobReader, BlobWriter, RemoteHandle, RemoteStore};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use url::Url;

type Blobs = Arc<Mutex<HashMap<String, Vec<u8>>>>;

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) handle: Arc<MemoryHandle>,
    pub(crate) resolves: AtomicUsize,
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn resolve_handle(&self, _endpoint: &Url) -> io::Result<Arc<dyn RemoteHandle>> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent first users could race
        tokio::task::yield_now().await;
        Ok(self.handle.clone())
    }
}

#[derive(Default)]
pub(crate) struct MemoryHandle {
    blobs: Blobs,
    pub(crate) opens: AtomicUsize,
    pub(crate) exists_checks: AtomicUsize,
    pub(crate) fail_deletes: AtomicBool,
    pub(crate) fail_reads: AtomicBool,
}

impl MemoryHandle {
    pub(crate) fn insert(&self, id: &str, data: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(id.to_string(), data.to_vec());
    }

    pub(crate) fn contents(&self, id: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(id).cloned()
    }

    pub(crate) fn reset_counters(&self) {
        self.opens.store(0, Ordering::SeqCst);
        self.exists_checks.store(0, Ordering::SeqCst);
    }

    fn not_found(id: &BlobId) -> io::Error {
        io::Error::new(io::ErrorKind::NotFound, format!("{} not found", id))
    }
}

#[async_trait]
impl RemoteHandle for MemoryHandle {
    async fn open(&self, id: &BlobId) -> io::Result<BlobReader> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let data = self.contents(id.as_str()).ok_or_else(|| Self::not_found(id))?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Ok(Box::pin(BrokenReader));
        }
        Ok(Box::pin(io::Cursor::new(data)))
    }

    async fn exists(&self, id: &BlobId) -> io::Result<bool> {
        self.exists_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.lock().unwrap().contains_key(id.as_str()))
    }

    async fn size(&self, id: &BlobId) -> io::Result<u64> {
        self.contents(id.as_str())
            .map(|d| d.len() as u64)
            .ok_or_else(|| Self::not_found(id))
    }

    async fn create(&self, id: &BlobId, overwrite: bool) -> io::Result<BlobWriter> {
        let mut blobs = self.blobs.lock().unwrap();
        if !overwrite && blobs.contains_key(id.as_str()) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, id.to_string()));
        }
        blobs.insert(id.to_string(), Vec::new());
        Ok(Box::pin(MemoryWriter {
            key: id.to_string(),
            blobs: self.blobs.clone(),
        }))
    }

    async fn delete(&self, id: &BlobId) -> io::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "namenode unreachable",
            ));
        }
        self.blobs.lock().unwrap().remove(id.as_str());
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> io::Result<Vec<BlobId>> {
        let blobs = self.blobs.lock().unwrap();
        let mut keys: Vec<&String> = blobs
            .keys()
            .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
            .collect();
        keys.sort();
        keys.into_iter()
            .map(|k| BlobId::parse(k).map_err(io::Error::from))
            .collect()
    }
}

struct MemoryWriter {
    key: String,
    blobs: Blobs,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.blobs
            .lock()
            .unwrap()
            .entry(self.key.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Fails on first read, like a stream cut off by the datanode
struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by datanode",
        )))
    }
}
