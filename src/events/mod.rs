//! Cache diagnostics — the event sink consumed by caches and backends.
//!
//! Events carry metadata only. Keys and values never reach a sink.

use std::fmt;
use std::time::Duration;

/// The kind of cache activity an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEventKind {
    Hit,
    Miss,
    Set,
    Delete,
    Evict,
}

impl CacheEventKind {
    /// Returns the lowercase event name used in log records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Evict => "evict",
        }
    }
}

impl fmt::Display for CacheEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub namespace: String,
    pub kind: CacheEventKind,
    pub duration: Option<Duration>,
    pub detail: Option<String>,
}

impl CacheEvent {
    /// Creates an event with no duration and no detail.
    pub fn new(namespace: impl Into<String>, kind: CacheEventKind) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            duration: None,
            detail: None,
        }
    }

    /// Attaches the elapsed time of the operation.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Attaches a short free-form detail, e.g. `reason=lru`.
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Receiver for cache diagnostics.
///
/// Implementations must be cheap and must not block: `emit` is called inline
/// on every cache operation.
pub trait CacheEventSink: Send + Sync {
    fn emit(&self, event: &CacheEvent);
}

/// Default sink that forwards events to `tracing` at `DEBUG` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl CacheEventSink for TracingSink {
    fn emit(&self, event: &CacheEvent) {
        tracing::debug!(
            namespace = %event.namespace,
            event = %event.kind,
            duration_ms = event.duration.map(|d| d.as_secs_f64() * 1000.0),
            detail = event.detail.as_deref(),
            "cache event"
        );
    }
}
