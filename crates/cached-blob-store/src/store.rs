//! Store front that hands out cache-mediated connections

use crate::connection::{CachedConnection, Hints};
use crate::error::{BlobStoreError, Result};
use crate::remote::RemoteStore;
use crate::rule::CacheRule;
use crate::writes::InFlightWrites;
use file_blob_cache::DiskCache;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

pub const DEFAULT_CACHE_DIR: &str = "/apps/fedora/hdfs/cache";
pub const DEFAULT_CACHE_PATTERN: &str = "TN/TN.0";
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024; // 1GB

/// Configuration for a [`CachedBlobStore`]. Unset cache options fall back to
/// the `DEFAULT_*` constants.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Remote namespace endpoint, e.g. `hdfs://namenode:9000`
    pub endpoint: Url,
    pub cache_dir: Option<PathBuf>,
    /// Identifier suffix selecting the blobs to cache
    pub cache_pattern: Option<String>,
    pub max_cache_size: Option<u64>,
}

impl StoreConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            cache_dir: None,
            cache_pattern: None,
            max_cache_size: None,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_dir = Some(cache_dir);
        self
    }

    pub fn with_cache_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.cache_pattern = Some(pattern.into());
        self
    }

    pub fn with_max_cache_size(mut self, max_cache_size: u64) -> Self {
        self.max_cache_size = Some(max_cache_size);
        self
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR))
    }

    pub fn cache_pattern(&self) -> &str {
        self.cache_pattern.as_deref().unwrap_or(DEFAULT_CACHE_PATTERN)
    }

    pub fn max_cache_size(&self) -> u64 {
        self.max_cache_size.unwrap_or(DEFAULT_MAX_CACHE_SIZE)
    }
}

/// Opaque transaction token. Connections never accept one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: String,
}

impl Transaction {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Blob store whose connections serve cacheable blobs from local disk.
///
/// All connections of a store share one cache index, so `max_cache_size`
/// bounds the directory as a whole.
pub struct CachedBlobStore {
    config: StoreConfig,
    remote: Arc<dyn RemoteStore>,
    cache: OnceCell<DiskCache>,
    writes: InFlightWrites,
}

impl CachedBlobStore {
    /// Store with default cache settings
    pub fn new(endpoint: Url, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_config(StoreConfig::new(endpoint), remote)
    }

    pub fn with_config(config: StoreConfig, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            config,
            remote,
            cache: OnceCell::new(),
            writes: InFlightWrites::default(),
        }
    }

    pub fn id(&self) -> &Url {
        &self.config.endpoint
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The cache shared by this store's connections, initialized on first use
    async fn cache(&self) -> Result<DiskCache> {
        let cache = self
            .cache
            .get_or_try_init(|| async {
                let cache = DiskCache::new(self.config.cache_dir(), self.config.max_cache_size());
                cache.init().await?;
                Ok::<_, BlobStoreError>(cache)
            })
            .await?;
        Ok(cache.clone())
    }

    /// Open a new connection. The remote handle is resolved on first use.
    pub async fn open_connection(
        &self,
        tx: Option<&Transaction>,
        _hints: &Hints,
    ) -> Result<CachedConnection> {
        if tx.is_some() {
            return Err(BlobStoreError::UnsupportedOperation(
                "Transactions are not supported".to_string(),
            ));
        }

        let cache = self.cache().await?;

        debug!(
            endpoint = %self.config.endpoint,
            cache_dir = ?cache.cache_dir(),
            pattern = self.config.cache_pattern(),
            "Opening cached connection"
        );

        Ok(CachedConnection::new(
            self.config.endpoint.clone(),
            self.remote.clone(),
            cache,
            self.writes.clone(),
            CacheRule::new(self.config.cache_pattern()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::BlobId;
    use crate::testing::MemoryStore;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    const THUMB: &str = "hdfs://store/a/TN/TN.0";

    fn endpoint() -> Url {
        Url::parse("hdfs://namenode:9000").unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::new(endpoint());
        assert_eq!(config.cache_dir(), PathBuf::from("/apps/fedora/hdfs/cache"));
        assert_eq!(config.cache_pattern(), "TN/TN.0");
        assert_eq!(config.max_cache_size(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_config_overrides() {
        let config = StoreConfig::new(endpoint())
            .with_cache_dir(PathBuf::from("/var/cache/blobs"))
            .with_cache_pattern("/THUMB")
            .with_max_cache_size(10);
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/blobs"));
        assert_eq!(config.cache_pattern(), "/THUMB");
        assert_eq!(config.max_cache_size(), 10);
    }

    #[tokio::test]
    async fn test_transactions_are_rejected() {
        let dir = tempdir().unwrap();
        let store = CachedBlobStore::with_config(
            StoreConfig::new(endpoint()).with_cache_dir(dir.path().to_path_buf()),
            Arc::new(MemoryStore::default()),
        );

        let tx = Transaction::new("tx-1");
        let err = store
            .open_connection(Some(&tx), &Hints::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BlobStoreError::UnsupportedOperation(_)));
    }

    #[tokio::test]
    async fn test_open_connection_is_lazy() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let remote = Arc::new(MemoryStore::default());
        let store = CachedBlobStore::with_config(
            StoreConfig::new(endpoint())
                .with_cache_dir(cache_dir.clone())
                .with_cache_pattern(".jpg"),
            remote.clone(),
        );

        let conn = store.open_connection(None, &Hints::new()).await.unwrap();

        assert!(cache_dir.is_dir());
        assert!(!conn.is_bound());
        assert!(!conn.is_closed());
        assert_eq!(conn.rule().suffix(), ".jpg");
        assert_eq!(conn.store_id(), store.id());
        assert_eq!(remote.resolves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_connections_share_cache_and_writes() {
        let dir = tempdir().unwrap();
        let remote = Arc::new(MemoryStore::default());
        remote.handle.insert(THUMB, b"thumbnail");
        let store = CachedBlobStore::with_config(
            StoreConfig::new(Url::parse("hdfs://store").unwrap())
                .with_cache_dir(dir.path().to_path_buf()),
            remote.clone(),
        );

        let first = store.open_connection(None, &Hints::new()).await.unwrap();
        let second = store.open_connection(None, &Hints::new()).await.unwrap();
        let thumb = BlobId::parse(THUMB).unwrap();

        first.get_blob(Some(&thumb), &Hints::new()).await.unwrap();
        assert_eq!(second.cache_stats().await.entries, 1);

        let writer = first.open_output_stream(&thumb, true).await.unwrap();
        let during = second.get_blob(Some(&thumb), &Hints::new()).await.unwrap();
        assert!(!during.is_cached());
        assert_eq!(second.cache_stats().await.entries, 0);
        drop(writer);
    }
}
