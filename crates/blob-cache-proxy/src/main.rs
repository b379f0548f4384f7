//! Blob Cache Proxy - HTTP front for a remote blob store
//!
//! Serves blobs from the remote namespace, keeping a local disk copy of
//! the blobs matched by the cache pattern (thumbnails by default).

mod error;
mod server;
mod types;

use crate::error::{ProxyError, Result};
use crate::server::{start_server, ServerState, SharedState};
use crate::types::ProxyConfig;
use cached_blob_store::{CachedBlobStore, Hints, MountedStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("blob_cache_proxy=info".parse()?)
        .add_directive("cached_blob_store=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Blob Cache Proxy...");

    let config = load_config()?;
    info!("Port: {}", config.port);
    info!("Remote endpoint: {}", config.remote_endpoint);
    info!("Remote root: {:?}", config.remote_root);
    info!("Cache dir: {:?}", config.cache_dir);
    info!("Cache pattern: {}", config.cache_pattern);
    info!(
        "Max cache size: {} MB",
        config.max_cache_size / (1024 * 1024)
    );

    let remote = Arc::new(MountedStore::new(config.remote_root.clone()));
    let store = CachedBlobStore::with_config(config.store_config(), remote);
    let connection = store.open_connection(None, &Hints::new()).await?;

    let state: SharedState = Arc::new(ServerState::new(connection));

    start_server(state.clone(), config.port)
        .await
        .map_err(|e| ProxyError::Config(format!("Server error: {}", e)))?;

    state.connection.close();
    Ok(())
}

fn load_config() -> Result<ProxyConfig> {
    let defaults = ProxyConfig::default();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(defaults.port);

    let remote_endpoint = match std::env::var("REMOTE_ENDPOINT") {
        Ok(s) => Url::parse(&s)
            .map_err(|e| ProxyError::Config(format!("invalid REMOTE_ENDPOINT {}: {}", s, e)))?,
        Err(_) => defaults.remote_endpoint,
    };

    let remote_root = std::env::var("REMOTE_ROOT")
        .map(PathBuf::from)
        .unwrap_or(defaults.remote_root);

    let cache_dir = std::env::var("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.cache_dir);

    let cache_pattern = std::env::var("CACHE_PATTERN").unwrap_or(defaults.cache_pattern);

    let max_cache_size = std::env::var("MAX_CACHE_SIZE")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(defaults.max_cache_size);

    Ok(ProxyConfig {
        port,
        remote_endpoint,
        remote_root,
        cache_dir,
        cache_pattern,
        max_cache_size,
    })
}
