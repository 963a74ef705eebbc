//! Storage backends — the capability every cache is built on.
//!
//! Two implementations ship with the crate:
//!
//! - [`MemoryBackend`] — bounded, TTL-aware, LRU-ordered in-process store.
//! - [`NoOpBackend`] — always-miss passthrough, selected when caching is
//!   disabled so call sites never branch on the global flag.
//!
//! A networked backend satisfies the same contract by implementing
//! [`CacheBackend`]; its failures surface as [`CacheError::Backend`].
//!
//! [`CacheError::Backend`]: crate::CacheError::Backend

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheResult;

pub mod memory;
pub mod noop;

pub use memory::MemoryBackend;
pub use noop::NoOpBackend;

/// Key/value storage with per-entry expiry.
///
/// # Contract
///
/// - `get` returns `None` for missing and for expired entries; an expired
///   entry is logically absent even before it is physically removed.
/// - `set` with `ttl_seconds <= 0` behaves as an immediate `delete`, not an
///   error.
/// - `delete` is idempotent and a no-op for missing keys.
/// - Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes, ttl_seconds: i64) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Short identifier used in diagnostics.
    fn name(&self) -> &'static str;
}
