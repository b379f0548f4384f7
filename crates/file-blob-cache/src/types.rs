//! Cache types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata for a cached blob entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(path: PathBuf, size: u64) -> Self {
        let now = Utc::now();
        Self {
            path,
            size,
            created_at: now,
            last_access: now,
        }
    }
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}
