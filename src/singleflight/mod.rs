//! Per-key mutual exclusion with reference-counted gates.
//!
//! A gate is created the first time a key is acquired and removed once the
//! last holder releases it, so idle keys cost nothing. Every holder of the
//! same key receives the same async mutex.
//!
//! ```text
//! acquire(k) ──► FlightPermit ──lock().await──► FlightGuard
//!                    │ drop                          │ drop
//!                    ▼                               ▼
//!                release(k)               unlock, then release(k)
//! ```
//!
//! Release is tied to `Drop`, so a holder that returns early, fails, or is
//! cancelled mid-`.await` still balances its acquire.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Gate {
    lock: Arc<AsyncMutex<()>>,
    refcount: usize,
}

/// Map of in-flight keys to their gates.
///
/// The map itself is guarded by a plain mutex that is only held for the
/// lookup/insert/decrement, never across an `.await`.
///
/// # Examples
///
/// ```
/// use nscache::singleflight::SingleFlight;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let flights = SingleFlight::<String>::new();
/// {
///     let _guard = flights.acquire("user:1".to_owned()).lock().await;
///     assert_eq!(flights.in_flight(), 1);
/// }
/// assert_eq!(flights.in_flight(), 0);
/// # }
/// ```
pub struct SingleFlight<K = String> {
    gates: Mutex<HashMap<K, Gate>>,
}

impl<K> Default for SingleFlight<K> {
    fn default() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> fmt::Debug for SingleFlight<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight").finish_non_exhaustive()
    }
}

impl<K> SingleFlight<K>
where
    K: Hash + Eq + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn gates(&self) -> MutexGuard<'_, HashMap<K, Gate>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers interest in `key` and returns a permit sharing the key's
    /// mutex with every other current holder.
    ///
    /// The first caller creates the gate; later callers bump its refcount.
    /// The returned permit is not yet locked; call [`FlightPermit::lock`].
    pub fn acquire(&self, key: K) -> FlightPermit<'_, K> {
        let lock = {
            let mut gates = self.gates();
            let gate = gates.entry(key.clone()).or_insert_with(|| Gate {
                lock: Arc::new(AsyncMutex::new(())),
                refcount: 0,
            });
            gate.refcount += 1;
            Arc::clone(&gate.lock)
        };
        FlightPermit {
            flights: self,
            key,
            lock,
        }
    }

    /// Drops one reference to `key`'s gate, removing the gate when no
    /// holders remain. Releasing a key with no gate is a no-op.
    ///
    /// Permits call this automatically on drop; calling it by hand for a key
    /// you hold a permit for unbalances the count.
    pub fn release(&self, key: &K) {
        let mut gates = self.gates();
        let Some(gate) = gates.get_mut(key) else {
            return;
        };
        gate.refcount = gate.refcount.saturating_sub(1);
        if gate.refcount == 0 {
            gates.remove(key);
        }
    }

    /// Number of keys that currently have a gate.
    pub fn in_flight(&self) -> usize {
        self.gates().len()
    }

    /// Number of holders (locked or waiting) for `key`.
    pub fn holders(&self, key: &K) -> usize {
        self.gates().get(key).map_or(0, |gate| gate.refcount)
    }
}

/// A registered, not-yet-locked interest in one key.
///
/// Dropping the permit releases the reference taken by
/// [`SingleFlight::acquire`].
pub struct FlightPermit<'a, K>
where
    K: Hash + Eq + Clone,
{
    flights: &'a SingleFlight<K>,
    key: K,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a, K> FlightPermit<'a, K>
where
    K: Hash + Eq + Clone,
{
    /// The per-key mutex shared by all holders of this key.
    pub fn mutex(&self) -> &Arc<AsyncMutex<()>> {
        &self.lock
    }

    /// Waits until no other holder of the key is inside its critical section.
    pub async fn lock(self) -> FlightGuard<'a, K> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        FlightGuard {
            _guard: guard,
            _permit: self,
        }
    }
}

impl<K> Drop for FlightPermit<'_, K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        self.flights.release(&self.key);
    }
}

/// Exclusive access to one key.
///
/// Fields drop in declaration order: the mutex unlocks before the permit
/// releases its reference.
pub struct FlightGuard<'a, K>
where
    K: Hash + Eq + Clone,
{
    _guard: OwnedMutexGuard<()>,
    _permit: FlightPermit<'a, K>,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn concurrent_holders_share_one_mutex() {
        let flights = SingleFlight::<String>::new();
        let first = flights.acquire("k".to_owned());
        let second = flights.acquire("k".to_owned());

        assert!(Arc::ptr_eq(first.mutex(), second.mutex()));
        assert_eq!(flights.holders(&"k".to_owned()), 2);
        assert_eq!(flights.in_flight(), 1);

        drop(first);
        assert_eq!(flights.holders(&"k".to_owned()), 1);
        drop(second);
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn distinct_keys_get_distinct_gates() {
        let flights = SingleFlight::<String>::new();
        let a = flights.acquire("a".to_owned());
        let b = flights.acquire("b".to_owned());
        assert!(!Arc::ptr_eq(a.mutex(), b.mutex()));
        assert_eq!(flights.in_flight(), 2);
    }

    #[test]
    fn fresh_gate_after_full_release() {
        let flights = SingleFlight::<String>::new();
        let first = flights.acquire("k".to_owned());
        let old = Arc::clone(first.mutex());
        drop(first);

        let again = flights.acquire("k".to_owned());
        assert!(!Arc::ptr_eq(&old, again.mutex()));
    }

    #[test]
    fn stray_release_is_noop() {
        let flights = SingleFlight::<String>::new();
        flights.release(&"ghost".to_owned());
        assert_eq!(flights.in_flight(), 0);

        let permit = flights.acquire("k".to_owned());
        flights.release(&"ghost".to_owned());
        assert_eq!(flights.holders(&"k".to_owned()), 1);
        drop(permit);
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let flights = SingleFlight::<String>::new();
        {
            let _guard = flights.acquire("k".to_owned()).lock().await;
            assert_eq!(flights.in_flight(), 1);
        }
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn critical_sections_never_overlap() {
        let flights = Arc::new(SingleFlight::<String>::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flights = Arc::clone(&flights);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _guard = flights.acquire("hot".to_owned()).lock().await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_its_reference() {
        let flights = SingleFlight::<String>::new();
        let held = flights.acquire("k".to_owned()).lock().await;

        let waited = tokio::time::timeout(
            Duration::from_millis(10),
            flights.acquire("k".to_owned()).lock(),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(flights.holders(&"k".to_owned()), 1);

        drop(held);
        assert_eq!(flights.in_flight(), 0);
    }

    #[test]
    fn works_with_tuple_keys() {
        let flights = SingleFlight::<(String, String)>::new();
        let a = flights.acquire(("db".to_owned(), "k".to_owned()));
        let b = flights.acquire(("http".to_owned(), "k".to_owned()));
        assert!(!Arc::ptr_eq(a.mutex(), b.mutex()));
    }
}
