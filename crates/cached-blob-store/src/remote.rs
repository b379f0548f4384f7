//! Capability interface of the remote blob namespace
//!
//! The transport (HDFS client, mounted gateway, test doubles) lives behind
//! these traits. Missing blobs are reported as `io::ErrorKind::NotFound`.

use crate::id::BlobId;
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

/// Byte stream read from a blob
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Byte sink writing a blob; shut it down to complete the write
pub type BlobWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Resolves a store endpoint to a live handle on its namespace
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn resolve_handle(&self, endpoint: &Url) -> io::Result<Arc<dyn RemoteHandle>>;
}

/// Operations on a resolved remote namespace
#[async_trait]
pub trait RemoteHandle: Send + Sync {
    async fn open(&self, id: &BlobId) -> io::Result<BlobReader>;

    async fn exists(&self, id: &BlobId) -> io::Result<bool>;

    async fn size(&self, id: &BlobId) -> io::Result<u64>;

    /// Fails with `AlreadyExists` if the blob exists and `overwrite` is false
    async fn create(&self, id: &BlobId, overwrite: bool) -> io::Result<BlobWriter>;

    /// Deleting a blob that does not exist is not an error
    async fn delete(&self, id: &BlobId) -> io::Result<()>;

    /// Identifiers whose string form starts with `prefix`
    async fn list(&self, prefix: Option<&str>) -> io::Result<Vec<BlobId>>;
}
