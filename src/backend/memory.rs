//! Bounded, TTL-aware, access-ordered in-process store.
//!
//! Expired entries are removed lazily: `get` drops an expired entry it runs
//! into, and every `set` sweeps all expired entries before trimming the
//! least-recently-used end down to capacity. There is no background sweeper;
//! the worst case for `set` is O(n) in `max_entries`.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::CacheBackend;
use crate::error::{CacheError, CacheResult};
use crate::events::{CacheEvent, CacheEventKind, CacheEventSink};

// A stored value and its absolute expiry. `None` means the TTL ran past the
// end of the monotonic clock, so the entry never expires.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    // Position in `Store::order`; larger is more recent.
    tick: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictReason {
    Expired,
    Lru,
}

impl EvictReason {
    fn detail(self) -> &'static str {
        match self {
            Self::Expired => "reason=expired",
            Self::Lru => "reason=lru",
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Slot>,
    // Recency index: tick → key, oldest first.
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Store {
    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.order.remove(&slot.tick);
        Some(slot)
    }

    fn touch(&mut self, key: &str) -> Option<Bytes> {
        let tick = self.bump();
        let slot = self.entries.get_mut(key)?;
        let old = std::mem::replace(&mut slot.tick, tick);
        let value = slot.entry.value.clone();
        if let Some(k) = self.order.remove(&old) {
            self.order.insert(tick, k);
        }
        Some(value)
    }

    fn insert(&mut self, key: &str, entry: CacheEntry) {
        self.remove(key);
        let tick = self.bump();
        self.order.insert(tick, key.to_owned());
        self.entries.insert(key.to_owned(), Slot { entry, tick });
    }

    fn sweep_expired(&mut self, now: Instant, evicted: &mut Vec<EvictReason>) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            evicted.push(EvictReason::Expired);
        }
    }

    fn trim_to(&mut self, max_entries: usize, evicted: &mut Vec<EvictReason>) {
        while self.entries.len() > max_entries {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted.push(EvictReason::Lru);
        }
    }
}

// Where eviction events go, tagged with the owning namespace.
#[derive(Clone)]
struct EvictionReporter {
    namespace: String,
    sink: Arc<dyn CacheEventSink>,
}

/// In-memory [`CacheBackend`] with TTL expiry and LRU eviction.
///
/// All access is serialized under one mutex, so a single instance is safe
/// to share between threads and tasks. The lock is never held across an
/// `.await`.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use nscache::backend::{CacheBackend, MemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), nscache::CacheError> {
/// let backend = MemoryBackend::new(2)?;
/// backend.set("a", Bytes::from_static(b"1"), 60).await?;
/// assert_eq!(backend.get("a").await?, Some(Bytes::from_static(b"1")));
/// # Ok(())
/// # }
/// ```
pub struct MemoryBackend {
    store: Mutex<Store>,
    max_entries: NonZeroUsize,
    reporter: Option<EvictionReporter>,
}

impl MemoryBackend {
    /// Creates a backend holding at most `max_entries` entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Configuration`] if `max_entries` is zero.
    pub fn new(max_entries: usize) -> CacheResult<Self> {
        let max_entries = NonZeroUsize::new(max_entries)
            .ok_or_else(|| CacheError::configuration("max_entries must be greater than 0"))?;
        Ok(Self::with_capacity(max_entries))
    }

    /// Creates a backend from an already-validated capacity.
    pub fn with_capacity(max_entries: NonZeroUsize) -> Self {
        Self {
            store: Mutex::new(Store::default()),
            max_entries,
            reporter: None,
        }
    }

    /// Reports every eviction to `sink` as an `evict` event for `namespace`.
    pub fn with_events(
        mut self,
        namespace: impl Into<String>,
        sink: Arc<dyn CacheEventSink>,
    ) -> Self {
        self.reporter = Some(EvictionReporter {
            namespace: namespace.into(),
            sink,
        });
        self
    }

    /// Maximum number of resident entries.
    pub fn max_entries(&self) -> usize {
        self.max_entries.get()
    }

    /// Number of resident entries, including expired entries that have not
    /// been swept yet.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, evicted: &[EvictReason]) {
        if evicted.is_empty() {
            return;
        }
        match &self.reporter {
            Some(reporter) => {
                for reason in evicted {
                    reporter.sink.emit(
                        &CacheEvent::new(reporter.namespace.as_str(), CacheEventKind::Evict)
                            .detail(reason.detail()),
                    );
                }
            }
            None => tracing::trace!(count = evicted.len(), "memory backend evicted entries"),
        }
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("max_entries", &self.max_entries)
            .field("entries", &self.len())
            .finish()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let now = Instant::now();
        {
            let mut store = self.lock();
            match store.entries.get(key).map(|slot| slot.entry.is_expired(now)) {
                None => return Ok(None),
                Some(false) => return Ok(store.touch(key)),
                Some(true) => {
                    store.remove(key);
                }
            }
        }
        self.report(&[EvictReason::Expired]);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl_seconds: i64) -> CacheResult<()> {
        if ttl_seconds <= 0 {
            self.lock().remove(key);
            return Ok(());
        }

        let now = Instant::now();
        let expires_at = now.checked_add(Duration::from_secs(ttl_seconds.unsigned_abs()));
        let mut evicted = Vec::new();
        {
            let mut store = self.lock();
            store.insert(key, CacheEntry { value, expires_at });
            store.sweep_expired(now, &mut evicted);
            store.trim_to(self.max_entries.get(), &mut evicted);
        }
        self.report(&evicted);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
