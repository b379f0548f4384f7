//! Serialization hooks plugged into [`DiskCache`](crate::DiskCache)

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWrite;

/// Converts cached values to and from their on-disk representation.
///
/// The cache owns file placement, atomic publication and eviction; a hook
/// implementation only moves bytes. `to_disk` writes into a temporary file
/// that is renamed into place once it returns `Ok`, so a failing hook never
/// leaves a visible entry behind.
#[async_trait]
pub trait CacheHooks: Send + Sync {
    type Value: Send + Sync;

    /// Write the full content of `value` into `sink`, returning the number of
    /// bytes written.
    async fn to_disk(
        &self,
        key: &str,
        value: &Self::Value,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> std::io::Result<u64>;

    /// Materialize a value for `key` whose bytes live at `path`.
    ///
    /// Returning `None` means the entry could not be turned into a usable
    /// value; the cache reports it as a miss.
    fn from_disk(&self, key: &str, path: &Path) -> Option<Self::Value>;
}
