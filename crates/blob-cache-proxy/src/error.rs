//! Error types for the blob cache proxy

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cached_blob_store::BlobStoreError;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ProxyError {
    Store(BlobStoreError),
    Io(Box<std::io::Error>),
    Config(String),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Store(err) => write!(f, "Blob store error: {}", err),
            ProxyError::Io(err) => write!(f, "IO error: {}", err),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Store(err) => Some(err),
            ProxyError::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<BlobStoreError> for ProxyError {
    fn from(err: BlobStoreError) -> Self {
        ProxyError::Store(err)
    }
}

impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::Io(Box::new(err))
    }
}

impl From<tracing_subscriber::filter::ParseError> for ProxyError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::Store(err) => match err {
                BlobStoreError::MissingBlob { .. } => StatusCode::NOT_FOUND,
                BlobStoreError::UnsupportedId { .. } | BlobStoreError::InvalidId(_) => {
                    StatusCode::BAD_REQUEST
                }
                BlobStoreError::DuplicateBlob(_) => StatusCode::CONFLICT,
                BlobStoreError::UnsupportedOperation(_) => StatusCode::NOT_IMPLEMENTED,
                BlobStoreError::IllegalState(_) => StatusCode::SERVICE_UNAVAILABLE,
                BlobStoreError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ProxyError::Io(_) | ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal server error");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
