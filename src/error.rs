//! Crate-wide error type.
//!
//! Errors raised by a caller's factory inside [`Cache::get_or_set`] are never
//! wrapped in [`CacheError`]; they keep the caller's own error type.
//!
//! [`Cache::get_or_set`]: crate::cache::Cache::get_or_set

use thiserror::Error;

/// Errors produced by the caching layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid construction parameters or settings. Not recoverable.
    #[error("invalid cache configuration: {message}")]
    Configuration { message: String },

    /// Input to a key helper (or a typed value) could not be serialized.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A storage backend failed. Propagated unchanged to the cache caller.
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
}

impl CacheError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl From<figment::Error> for CacheError {
    fn from(err: figment::Error) -> Self {
        Self::configuration(err.to_string())
    }
}

/// Shorthand for results carrying a [`CacheError`].
pub type CacheResult<T> = Result<T, CacheError>;
