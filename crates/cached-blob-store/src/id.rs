//! Blob identifiers

use crate::error::{BlobStoreError, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

/// URI naming a blob in the remote store, e.g. `hdfs://namenode:9000/obj/TN/TN.0`.
///
/// The normalized string form doubles as the cache key, so spellings of the
/// same URI share one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobId(Url);

impl BlobId {
    /// Parse an absolute URI.
    ///
    /// The URI is normalized on the way in: the scheme is lowercased, `.` and
    /// `..` path segments are resolved and characters outside the URL
    /// character set are percent-encoded. [`as_str`](Self::as_str) returns the
    /// normalized form, which may differ from `s`.
    pub fn parse(s: &str) -> Result<Self> {
        Url::parse(s)
            .map(Self)
            .map_err(|e| BlobStoreError::InvalidId(format!("{}: {}", s, e)))
    }

    /// New random identifier under the given store id
    pub fn mint(store_id: &Url) -> Result<Self> {
        let mut id = store_id.as_str().to_string();
        if !id.ends_with('/') {
            id.push('/');
        }
        id.push_str(&Uuid::new_v4().to_string());
        Self::parse(&id)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Percent-encoded path component
    pub fn path(&self) -> &str {
        self.0.path()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlobId {
    type Err = BlobStoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<Url> for BlobId {
    fn from(url: Url) -> Self {
        Self(url)
    }
}
