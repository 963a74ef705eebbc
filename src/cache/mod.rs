//! Namespaced cache facade — read-through caching with request coalescing.
//!
//! A [`Cache`] combines one [`CacheBackend`], one [`CachePolicy`] and a
//! [`SingleFlight`] shared with the other namespaces of a registry. Its
//! central operation, [`Cache::get_or_set`], guarantees that at most one
//! factory call per key is in flight at any time:
//!
//! ```text
//! get(key) ── hit ──────────────────────────────────────────► value
//!    │ miss
//!    ▼
//! acquire gate(ns, key) ─► lock ─► get(key) ── hit ─────────► value
//!                                     │ miss
//!                                     ▼
//!                                factory() ─► set(key) ─────► value
//! ```
//!
//! Failures are never shared: a factory error reaches only the caller whose
//! factory ran, nothing is stored, and the next waiter becomes the leader
//! and retries with its own factory.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::backend::CacheBackend;
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, CacheEventKind, CacheEventSink, TracingSink};
use crate::singleflight::SingleFlight;

pub mod policy;

pub use policy::CachePolicy;

/// Gate identity inside a shared [`SingleFlight`].
///
/// Keying gates by namespace as well as key means equal raw keys in two
/// namespaces never wait on each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlightKey {
    pub namespace: Arc<str>,
    pub key: String,
}

/// Point-in-time counters for one [`Cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub factory_calls: u64,
    pub factory_errors: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    factory_calls: AtomicU64,
    factory_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            factory_calls: self.factory_calls.load(Ordering::Relaxed),
            factory_errors: self.factory_errors.load(Ordering::Relaxed),
        }
    }
}

/// A namespace's cache.
///
/// Cheap to share behind an [`Arc`]; every method takes `&self` and is safe
/// to call from many tasks at once.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use nscache::{Cache, CacheError, CachePolicy, MemoryBackend, SingleFlight};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), CacheError> {
/// let policy = CachePolicy::new("http", 300, 128)?;
/// let backend = Arc::new(MemoryBackend::with_capacity(policy.max_entries()));
/// let cache = Cache::new(policy, backend, Arc::new(SingleFlight::new()));
///
/// let body = cache
///     .get_or_set("GET /users", || async { Ok::<_, CacheError>(Bytes::from("[]")) }, None)
///     .await?;
/// assert_eq!(body, Bytes::from("[]"));
/// # Ok(())
/// # }
/// ```
pub struct Cache {
    namespace: Arc<str>,
    policy: CachePolicy,
    backend: Arc<dyn CacheBackend>,
    flights: Arc<SingleFlight<FlightKey>>,
    sink: Arc<dyn CacheEventSink>,
    counters: Counters,
}

impl Cache {
    /// Builds a cache that reports events through [`TracingSink`].
    pub fn new(
        policy: CachePolicy,
        backend: Arc<dyn CacheBackend>,
        flights: Arc<SingleFlight<FlightKey>>,
    ) -> Self {
        Self {
            namespace: Arc::from(policy.namespace()),
            policy,
            backend,
            flights,
            sink: Arc::new(TracingSink),
            counters: Counters::default(),
        }
    }

    /// Replaces the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn CacheEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Name of the backing store (`"memory"`, `"noop"`, ...).
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    fn emit(&self, event: CacheEvent) {
        self.sink.emit(&event);
    }

    fn event(&self, kind: CacheEventKind) -> CacheEvent {
        CacheEvent::new(&*self.namespace, kind)
    }

    fn record_lookup(&self, found: bool, detail: Option<&'static str>) {
        let (counter, kind) = if found {
            (&self.counters.hits, CacheEventKind::Hit)
        } else {
            (&self.counters.misses, CacheEventKind::Miss)
        };
        Counters::bump(counter);
        let mut event = self.event(kind);
        if let Some(detail) = detail {
            event = event.detail(detail);
        }
        self.emit(event);
    }

    /// Looks `key` up in the backend.
    ///
    /// # Errors
    ///
    /// Propagates backend failures unchanged.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let value = self.backend.get(key).await?;
        self.record_lookup(value.is_some(), None);
        Ok(value)
    }

    /// Stores `value` under `key` for `ttl_seconds`, or for the policy's
    /// default TTL when `None`. A TTL of zero or less removes the key.
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl_seconds: Option<i64>,
    ) -> CacheResult<()> {
        let ttl = self.policy.resolve_ttl(ttl_seconds);
        self.backend.set(key, value.into(), ttl).await?;
        Counters::bump(&self.counters.sets);
        self.emit(self.event(CacheEventKind::Set).detail(format!("ttl={ttl}")));
        Ok(())
    }

    /// Removes `key`. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.backend.delete(key).await?;
        Counters::bump(&self.counters.deletes);
        self.emit(self.event(CacheEventKind::Delete));
        Ok(())
    }

    /// Returns the cached value for `key`, computing and storing it with
    /// `factory` on a miss.
    ///
    /// Concurrent callers for the same key are coalesced: one runs its
    /// factory while the rest wait, then read the stored result. If the
    /// running factory fails, its caller gets the error, nothing is cached,
    /// and one of the waiters runs its own factory next.
    ///
    /// The key's gate is released on every exit path, including when the
    /// returned future is dropped before completion.
    ///
    /// # Errors
    ///
    /// Returns the factory's error verbatim, or a backend error converted
    /// into `E`.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl_seconds: Option<i64>,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
        E: From<CacheError>,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let _flight = self
            .flights
            .acquire(FlightKey {
                namespace: Arc::clone(&self.namespace),
                key: key.to_owned(),
            })
            .lock()
            .await;

        // Another leader may have filled the key while we waited.
        if let Some(value) = self.backend.get(key).await? {
            self.record_lookup(true, Some("after_wait"));
            return Ok(value);
        }

        Counters::bump(&self.counters.factory_calls);
        let started = Instant::now();
        let value = match factory().await {
            Ok(value) => value,
            Err(err) => {
                Counters::bump(&self.counters.factory_errors);
                tracing::debug!(namespace = %self.namespace, "cache factory failed; nothing stored");
                return Err(err);
            }
        };

        let ttl = self.policy.resolve_ttl(ttl_seconds);
        self.backend.set(key, value.clone(), ttl).await?;
        Counters::bump(&self.counters.sets);
        self.emit(
            self.event(CacheEventKind::Set)
                .duration(started.elapsed())
                .detail(format!("ttl={ttl}")),
        );
        Ok(value)
    }

    /// Reads and decodes a JSON value stored by [`set_json`](Self::set_json).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the stored bytes are not a
    /// valid `T`.
    pub async fn get_json<T>(&self, key: &str) -> CacheResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encodes `value` as JSON and stores it.
    pub async fn set_json<T>(&self, key: &str, value: &T, ttl_seconds: Option<i64>) -> CacheResult<()>
    where
        T: Serialize + ?Sized,
    {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, bytes, ttl_seconds).await
    }

    /// Typed variant of [`get_or_set`](Self::get_or_set) that stores the
    /// factory's result as JSON.
    pub async fn get_or_set_json<T, F, Fut, E>(
        &self,
        key: &str,
        factory: F,
        ttl_seconds: Option<i64>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CacheError>,
    {
        let bytes = self
            .get_or_set(
                key,
                move || async move {
                    let value = factory().await?;
                    let encoded = serde_json::to_vec(&value).map_err(CacheError::from)?;
                    Ok::<_, E>(Bytes::from(encoded))
                },
                ttl_seconds,
            )
            .await?;
        Ok(serde_json::from_slice(&bytes).map_err(CacheError::from)?)
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("policy", &self.policy)
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
