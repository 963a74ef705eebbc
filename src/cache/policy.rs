use std::num::NonZeroUsize;

use serde::Serialize;

use crate::error::{CacheError, CacheResult};

/// Immutable per-namespace cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachePolicy {
    namespace: String,
    default_ttl_seconds: u64,
    max_entries: NonZeroUsize,
}

impl CachePolicy {
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] if `max_entries` is zero.
    pub fn new(
        namespace: impl Into<String>,
        default_ttl_seconds: u64,
        max_entries: usize,
    ) -> CacheResult<Self> {
        let max_entries = NonZeroUsize::new(max_entries)
            .ok_or_else(|| CacheError::configuration("max_entries must be greater than 0"))?;
        Ok(Self::with_capacity(namespace, default_ttl_seconds, max_entries))
    }

    pub fn with_capacity(
        namespace: impl Into<String>,
        default_ttl_seconds: u64,
        max_entries: NonZeroUsize,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            default_ttl_seconds,
            max_entries,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn default_ttl_seconds(&self) -> u64 {
        self.default_ttl_seconds
    }

    pub fn max_entries(&self) -> NonZeroUsize {
        self.max_entries
    }

    /// Picks the explicit TTL if given, else this policy's default, clamped
    /// to the signed range backends accept.
    pub fn resolve_ttl(&self, ttl_seconds: Option<i64>) -> i64 {
        ttl_seconds.unwrap_or_else(|| i64::try_from(self.default_ttl_seconds).unwrap_or(i64::MAX))
    }
}
