//! Error types for the file blob cache

use std::fmt;

#[derive(Debug)]
pub enum CacheError {
    Io(Box<std::io::Error>),
    /// The serialization hook failed; nothing was published for `key`.
    Populate {
        key: String,
        source: std::io::Error,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(err) => write!(f, "IO error: {}", err),
            CacheError::Populate { key, source } => {
                write!(f, "Failed to populate cache entry {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(err) => Some(err.as_ref()),
            CacheError::Populate { source, .. } => Some(source),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
