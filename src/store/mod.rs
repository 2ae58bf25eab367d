#[cfg(feature = "dashmap")]
#[cfg_attr(docsrs, doc(cfg(feature = "dashmap")))]
pub mod memory;

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
pub mod redis;

use std::future::Future;
use thiserror::Error;

/// The counter for one rate limit key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Requests observed since the window began, always at least 1.
    pub hits: u64,
    /// Unix timestamp at which the window ends.
    pub reset: u64,
}

/// Storage for per-key hit counters.
///
/// A store is required to implement [Clone], usually this means wrapping the
/// underlying map or connection within an [Arc](std::sync::Arc), although many
/// connection managers already do so internally; there is no need to wrap it
/// twice.
///
/// Implementations must apply the create-or-increment atomically per key, so
/// that concurrent calls for the same key never lose an increment and never
/// observe a stale count. Keys must not interfere with each other; in
/// particular a store must not serialize calls across unrelated keys.
pub trait CounterStore: Clone {
    type Error;

    /// Record one hit against `key` and return the resulting counter.
    ///
    /// If no record exists for the key, or the existing record's window has
    /// ended (`reset <= now`), a fresh record is created with `hits = 1` and
    /// `reset = window_end`. Otherwise the existing record's hit count is
    /// incremented in place. An expired record is never returned.
    fn record(
        &self,
        key: &str,
        now: u64,
        window_end: u64,
    ) -> impl Future<Output = Result<Counter, Self::Error>>;

    /// Remove the counter for a key, so that its window restarts on the next
    /// hit.
    fn remove_key(&self, key: &str) -> impl Future<Output = Result<(), Self::Error>>;
}

/// The closed set of counter stores selectable from a
/// [LimiterConfig](crate::LimiterConfig).
///
/// The variant is chosen once at construction; there is no runtime fallback
/// between backends.
#[derive(Clone)]
pub enum AnyStore {
    #[cfg(feature = "dashmap")]
    Memory(memory::InMemoryStore),
    #[cfg(feature = "redis")]
    Redis(redis::RedisStore),
}

/// Error produced by [AnyStore].
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "redis")]
    #[error(transparent)]
    Redis(#[from] redis::Error),
}

impl CounterStore for AnyStore {
    type Error = StoreError;

    async fn record(&self, key: &str, now: u64, window_end: u64) -> Result<Counter, StoreError> {
        match self {
            #[cfg(feature = "dashmap")]
            AnyStore::Memory(store) => Ok(store
                .record(key, now, window_end)
                .await
                .unwrap_or_else(|never| match never {})),
            #[cfg(feature = "redis")]
            AnyStore::Redis(store) => Ok(store.record(key, now, window_end).await?),
        }
    }

    async fn remove_key(&self, key: &str) -> Result<(), StoreError> {
        match self {
            #[cfg(feature = "dashmap")]
            AnyStore::Memory(store) => Ok(store
                .remove_key(key)
                .await
                .unwrap_or_else(|never| match never {})),
            #[cfg(feature = "redis")]
            AnyStore::Redis(store) => Ok(store.remove_key(key).await?),
        }
    }
}
