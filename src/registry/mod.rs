//! Namespace → [`Cache`] registry.
//!
//! The registry is an ordinary value: build one at startup from
//! [`CacheSettings`] and hand it (usually behind an [`Arc`]) to whatever
//! needs caching. Caches are created lazily on first use and live as long as
//! the registry. All of them share one [`SingleFlight`], keyed by
//! `(namespace, key)`.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::backend::{CacheBackend, MemoryBackend, NoOpBackend};
use crate::cache::{Cache, CachePolicy, FlightKey};
use crate::config::CacheSettings;
use crate::error::CacheResult;
use crate::events::{CacheEventSink, TracingSink};
use crate::singleflight::SingleFlight;

// Resolved once from the global enable flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BackendKind {
    Memory { max_entries: NonZeroUsize },
    Disabled,
}

/// Process-wide set of namespaced caches.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use nscache::{CacheError, CacheRegistry, CacheSettings};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), CacheError> {
/// let registry = CacheRegistry::new(CacheSettings::default())?;
/// let db = registry.get_cache("db");
///
/// let row = db
///     .get_or_set("db:user:1", || async { Ok::<_, CacheError>(Bytes::from("ada")) }, None)
///     .await?;
/// assert_eq!(row, Bytes::from("ada"));
/// assert_eq!(db.policy().default_ttl_seconds(), 60);
/// # Ok(())
/// # }
/// ```
pub struct CacheRegistry {
    settings: CacheSettings,
    kind: BackendKind,
    sink: Arc<dyn CacheEventSink>,
    flights: Arc<SingleFlight<FlightKey>>,
    caches: Mutex<HashMap<String, Arc<Cache>>>,
}

impl CacheRegistry {
    /// Builds a registry reporting events through [`TracingSink`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`](crate::CacheError::Configuration)
    /// if `settings` fail validation.
    pub fn new(settings: CacheSettings) -> CacheResult<Self> {
        Self::with_sink(settings, Arc::new(TracingSink))
    }

    /// Builds a registry whose caches and backends report to `sink`.
    pub fn with_sink(settings: CacheSettings, sink: Arc<dyn CacheEventSink>) -> CacheResult<Self> {
        settings.validate()?;
        let kind = match NonZeroUsize::new(settings.max_entries) {
            Some(max_entries) if settings.enabled => BackendKind::Memory { max_entries },
            _ => BackendKind::Disabled,
        };
        match kind {
            BackendKind::Memory { max_entries } => {
                info!(max_entries = max_entries.get(), "caching enabled with in-memory backend");
            }
            BackendKind::Disabled => info!("caching disabled; all namespaces pass through"),
        }

        Ok(Self {
            settings,
            kind,
            sink,
            flights: Arc::new(SingleFlight::new()),
            caches: Mutex::new(HashMap::new()),
        })
    }

    fn caches(&self) -> MutexGuard<'_, HashMap<String, Arc<Cache>>> {
        self.caches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the cache for `namespace`, creating it on first use.
    ///
    /// Repeated calls with the same namespace return the same instance.
    pub fn get_cache(&self, namespace: &str) -> Arc<Cache> {
        let mut caches = self.caches();
        if let Some(cache) = caches.get(namespace) {
            return Arc::clone(cache);
        }

        let cache = Arc::new(self.build(namespace));
        caches.insert(namespace.to_owned(), Arc::clone(&cache));
        cache
    }

    fn build(&self, namespace: &str) -> Cache {
        let ttl = self.settings.ttl_for(namespace);
        let (policy, backend): (CachePolicy, Arc<dyn CacheBackend>) = match self.kind {
            BackendKind::Memory { max_entries } => (
                CachePolicy::with_capacity(namespace, ttl, max_entries),
                Arc::new(
                    MemoryBackend::with_capacity(max_entries)
                        .with_events(namespace, Arc::clone(&self.sink)),
                ),
            ),
            BackendKind::Disabled => (
                // Capacity is meaningless for a store that keeps nothing.
                CachePolicy::with_capacity(namespace, ttl, NonZeroUsize::MIN),
                Arc::new(NoOpBackend),
            ),
        };
        debug!(
            namespace,
            backend = backend.name(),
            default_ttl_secs = ttl,
            "cache namespace created"
        );
        Cache::new(policy, backend, Arc::clone(&self.flights)).with_sink(Arc::clone(&self.sink))
    }

    /// Whether namespaces are backed by real storage.
    pub fn is_enabled(&self) -> bool {
        matches!(self.kind, BackendKind::Memory { .. })
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Namespaces created so far, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches().keys().cloned().collect();
        names.sort();
        names
    }

    /// The single-flight map shared by every namespace.
    pub fn flights(&self) -> &Arc<SingleFlight<FlightKey>> {
        &self.flights
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("kind", &self.kind)
            .field("namespaces", &self.namespaces())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::CacheError;
    use crate::events::CacheEventKind;
    use crate::events::testing::RecordingSink;

    #[test]
    fn same_namespace_returns_same_cache() {
        let registry = CacheRegistry::new(CacheSettings::default()).unwrap();
        let a = registry.get_cache("db");
        let b = registry.get_cache("db");
        let c = registry.get_cache("http");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.namespaces(), vec!["db", "http"]);
    }

    #[test]
    fn policy_resolves_namespace_ttl() {
        let registry = CacheRegistry::new(CacheSettings::default()).unwrap();
        assert_eq!(registry.get_cache("db").policy().default_ttl_seconds(), 60);
        assert_eq!(
            registry.get_cache("embed").policy().default_ttl_seconds(),
            86_400
        );
        // Unknown namespaces fall back to the default namespace's TTL.
        assert_eq!(
            registry.get_cache("sessions").policy().default_ttl_seconds(),
            300
        );
        assert_eq!(registry.get_cache("db").policy().max_entries().get(), 1024);
    }

    #[test]
    fn invalid_settings_fail_construction() {
        let settings = CacheSettings {
            max_entries: 0,
            ..CacheSettings::default()
        };
        assert!(matches!(
            CacheRegistry::new(settings),
            Err(CacheError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn enabled_registry_uses_memory_backend() {
        let registry = CacheRegistry::new(CacheSettings::default()).unwrap();
        assert!(registry.is_enabled());
        let cache = registry.get_cache("http");
        assert_eq!(cache.backend_name(), "memory");

        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn disabled_registry_passes_through() {
        let settings = CacheSettings {
            enabled: false,
            max_entries: 0,
            ..CacheSettings::default()
        };
        let registry = CacheRegistry::new(settings).unwrap();
        assert!(!registry.is_enabled());

        let cache = registry.get_cache("llm");
        assert_eq!(cache.backend_name(), "noop");

        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let value = cache
                .get_or_set(
                    "k",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, CacheError>(Bytes::from("fresh"))
                    },
                    None,
                )
                .await
                .unwrap();
            assert_eq!(value, Bytes::from("fresh"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evictions_reach_registry_sink() {
        let sink = Arc::new(RecordingSink::default());
        let settings = CacheSettings {
            max_entries: 1,
            ..CacheSettings::default()
        };
        let registry = CacheRegistry::with_sink(settings, sink.clone()).unwrap();
        let cache = registry.get_cache("prompt");

        cache.set("a", "1", None).await.unwrap();
        cache.set("b", "2", None).await.unwrap();

        let evictions: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.kind == CacheEventKind::Evict)
            .collect();
        assert_eq!(evictions.len(), 1);
        assert_eq!(evictions[0].namespace, "prompt");
        assert_eq!(evictions[0].detail.as_deref(), Some("reason=lru"));
    }

    #[tokio::test]
    async fn namespaces_share_one_flight_map() {
        let registry = CacheRegistry::new(CacheSettings::default()).unwrap();
        let db = registry.get_cache("db");
        let http = registry.get_cache("http");

        db.get_or_set("k", || async { Ok::<_, CacheError>(Bytes::from("a")) }, None)
            .await
            .unwrap();
        http.get_or_set("k", || async { Ok::<_, CacheError>(Bytes::from("b")) }, None)
            .await
            .unwrap();

        // Same raw key, separate namespaces: separate values.
        assert_eq!(db.get("k").await.unwrap(), Some(Bytes::from("a")));
        assert_eq!(http.get("k").await.unwrap(), Some(Bytes::from("b")));
        assert_eq!(registry.flights().in_flight(), 0);
    }

    #[test]
    fn concurrent_first_access_builds_once() {
        let registry = Arc::new(CacheRegistry::new(CacheSettings::default()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.get_cache("db"))
            })
            .collect();
        let caches: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(caches.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
