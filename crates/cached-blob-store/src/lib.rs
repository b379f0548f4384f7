//! Cache-mediated blob store
//!
//! Connections to a remote blob namespace (addressed by URI, e.g.
//! `hdfs://namenode:9000/...`) that transparently serve blobs matching a
//! URI-suffix rule from a local disk cache. Cache entries are populated on
//! first read and invalidated before remote deletes and rewrites.

mod adapter;
mod blob;
mod connection;
pub mod error;
mod id;
mod mounted;
mod remote;
mod rule;
mod store;
mod writes;

#[cfg(test)]
mod testing;

pub use adapter::BlobCacheAdapter;
pub use blob::{Blob, Origin};
pub use connection::{CachedConnection, Hints};
pub use error::{BlobStoreError, Result};
pub use file_blob_cache::CacheStats;
pub use id::BlobId;
pub use mounted::MountedStore;
pub use remote::{BlobReader, BlobWriter, RemoteHandle, RemoteStore};
pub use rule::CacheRule;
pub use store::{
    CachedBlobStore, StoreConfig, Transaction, DEFAULT_CACHE_DIR, DEFAULT_CACHE_PATTERN,
    DEFAULT_MAX_CACHE_SIZE,
};
