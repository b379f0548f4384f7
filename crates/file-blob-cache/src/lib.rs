//! File-based blob cache with pluggable serialization hooks and LRU eviction
//!
//! Entries are stored on disk under a sha256-derived file name with in-memory
//! metadata tracking. How a value is written to and materialized from disk is
//! supplied by the caller through [`CacheHooks`], so the same engine can hold
//! raw bytes or back a richer handle type.

mod cache;
mod error;
mod hooks;
mod types;

pub use cache::DiskCache;
pub use error::{CacheError, Result};
pub use hooks::CacheHooks;
pub use types::{CacheEntry, CacheStats};
