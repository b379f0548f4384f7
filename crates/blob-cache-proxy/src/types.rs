//! Core types for the blob cache proxy

use cached_blob_store::{
    CacheStats, StoreConfig, DEFAULT_CACHE_DIR, DEFAULT_CACHE_PATTERN, DEFAULT_MAX_CACHE_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Configuration for the proxy
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub remote_endpoint: Url,
    /// Where the remote namespace is mounted locally
    pub remote_root: PathBuf,
    pub cache_dir: PathBuf,
    pub cache_pattern: String,
    pub max_cache_size: u64,
}

impl ProxyConfig {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.remote_endpoint.clone())
            .with_cache_dir(self.cache_dir.clone())
            .with_cache_pattern(self.cache_pattern.clone())
            .with_max_cache_size(self.max_cache_size)
    }
}

pub const DEFAULT_REMOTE_ENDPOINT: &str = "hdfs://localhost:9000";

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: 3002,
            remote_endpoint: Url::parse(DEFAULT_REMOTE_ENDPOINT)
                .expect("default endpoint is a valid URL"),
            remote_root: PathBuf::from("./data/remote"),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            cache_pattern: DEFAULT_CACHE_PATTERN.to_string(),
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
        }
    }
}

/// Query naming a single blob
#[derive(Debug, Deserialize)]
pub struct BlobQuery {
    pub uri: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub ids: Vec<String>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub cache: CacheStats,
}
