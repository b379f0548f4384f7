//! Error types for the cached blob store

use crate::id::BlobId;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum BlobStoreError {
    /// A transaction was supplied where none is supported
    UnsupportedOperation(String),
    /// The identifier does not belong to this store
    UnsupportedId { id: String, reason: String },
    /// Neither the cache nor the remote store has the blob
    MissingBlob { id: String, cause: String },
    /// The blob already exists and overwriting was not requested
    DuplicateBlob(String),
    /// The connection has been closed
    IllegalState(String),
    /// The string is not a valid blob identifier
    InvalidId(String),
    Io(Box<io::Error>),
}

impl BlobStoreError {
    /// Normalize a remote-store failure: not-found becomes `MissingBlob`,
    /// everything else passes through as I/O.
    pub(crate) fn from_remote(id: &BlobId, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            BlobStoreError::MissingBlob {
                id: id.to_string(),
                cause: err.to_string(),
            }
        } else {
            BlobStoreError::Io(Box::new(err))
        }
    }
}

impl fmt::Display for BlobStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobStoreError::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            BlobStoreError::UnsupportedId { id, reason } => {
                write!(f, "Unsupported blob id {}: {}", id, reason)
            }
            BlobStoreError::MissingBlob { id, cause } => write!(f, "Missing blob {}: {}", id, cause),
            BlobStoreError::DuplicateBlob(id) => write!(f, "Blob already exists: {}", id),
            BlobStoreError::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            BlobStoreError::InvalidId(msg) => write!(f, "Invalid blob id: {}", msg),
            BlobStoreError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for BlobStoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobStoreError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for BlobStoreError {
    fn from(err: io::Error) -> Self {
        BlobStoreError::Io(Box::new(err))
    }
}

impl From<file_blob_cache::CacheError> for BlobStoreError {
    fn from(err: file_blob_cache::CacheError) -> Self {
        match err {
            file_blob_cache::CacheError::Io(err) => BlobStoreError::Io(err),
            file_blob_cache::CacheError::Populate { source, .. } => {
                BlobStoreError::Io(Box::new(source))
            }
        }
    }
}

impl From<BlobStoreError> for io::Error {
    fn from(err: BlobStoreError) -> Self {
        match err {
            BlobStoreError::Io(err) => *err,
            BlobStoreError::MissingBlob { .. } => io::Error::new(io::ErrorKind::NotFound, err),
            BlobStoreError::DuplicateBlob(_) => io::Error::new(io::ErrorKind::AlreadyExists, err),
            BlobStoreError::UnsupportedId { .. } | BlobStoreError::InvalidId(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, err)
            }
            _ => io::Error::other(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlobStoreError>;
