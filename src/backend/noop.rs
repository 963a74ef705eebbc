//! Backend that stores nothing.

use async_trait::async_trait;
use bytes::Bytes;

use super::CacheBackend;
use crate::error::CacheResult;

/// Always-miss backend.
///
/// Every `get` returns `None`; `set` and `delete` succeed without storing
/// anything. Used when caching is globally disabled so callers transparently
/// degrade to cache-miss behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpBackend;

impl NoOpBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheBackend for NoOpBackend {
    async fn get(&self, _key: &str) -> CacheResult<Option<Bytes>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl_seconds: i64) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_sequence_reads_absent() {
        let backend = NoOpBackend::new();
        assert!(backend.get("k").await.unwrap().is_none());

        backend.set("k", Bytes::from_static(b"v"), 60).await.unwrap();
        assert!(backend.get("k").await.unwrap().is_none());

        backend.delete("k").await.unwrap();
        backend.delete("k").await.unwrap();
        backend.set("k", Bytes::from_static(b"v"), 0).await.unwrap();
        backend.set("k", Bytes::from_static(b"v"), -5).await.unwrap();
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[test]
    fn reports_its_name() {
        assert_eq!(NoOpBackend.name(), "noop");
    }
}
