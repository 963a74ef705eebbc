//! # nscache
//!
//! Namespaced in-process caching with TTL+LRU eviction and single-flight
//! request coalescing.
//!
//! ## Quick Start
//!
//! ```rust
//! use bytes::Bytes;
//! use nscache::{CacheError, CacheRegistry, CacheSettings, keys};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), CacheError> {
//! let registry = CacheRegistry::new(CacheSettings::default())?;
//! let http = registry.get_cache("http");
//!
//! let key = format!("http:{}", keys::canonical_query_string([("q", Some("rust"))]));
//! let body = http
//!     .get_or_set(&key, || async { Ok::<_, CacheError>(Bytes::from("results")) }, None)
//!     .await?;
//! assert_eq!(body, Bytes::from("results"));
//! # Ok(())
//! # }
//! ```

// ── Core ──────────────────────────────────────────────────────────────────────
pub mod backend;
pub mod cache;
pub mod registry;
pub mod singleflight;

// ── Supporting ────────────────────────────────────────────────────────────────
pub mod config;
pub mod error;
pub mod events;
pub mod keys;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use backend::{CacheBackend, MemoryBackend, NoOpBackend};
pub use cache::{Cache, CachePolicy, CacheStats, FlightKey};
pub use config::{CacheSettings, SettingsLoader};
pub use error::{CacheError, CacheResult};
pub use events::{CacheEvent, CacheEventKind, CacheEventSink, TracingSink};
pub use registry::CacheRegistry;
pub use singleflight::SingleFlight;
