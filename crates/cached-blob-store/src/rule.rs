use crate::id::BlobId;
use crate::store::DEFAULT_CACHE_PATTERN;

/// Decides which blobs are mirrored into the cache: those whose identifier
/// ends with the configured suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRule {
    suffix: String,
}

impl CacheRule {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn matches(&self, id: &BlobId) -> bool {
        id.as_str().ends_with(&self.suffix)
    }
}

impl Default for CacheRule {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PATTERN)
    }
}
