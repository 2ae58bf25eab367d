use crate::clock::{Clock, SystemClock};
use crate::store::{Counter, CounterStore};
use actix_web::rt::task::JoinHandle;
use dashmap::DashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60 * 10;

/// A [CounterStore] that keeps hit counters in a process-local
/// [Dashmap](dashmap::DashMap).
///
/// Counters live for the lifetime of the process; a restart silently resets
/// every window. Use the Redis store to share counters across processes.
#[derive(Clone)]
pub struct InMemoryStore {
    map: Arc<DashMap<String, Counter>>,
    sweeper: Option<Arc<SweeperGuard>>,
}

/// Aborts the sweeper task once the last clone of the store is gone.
///
/// Clones of the store share the guard, so dropping a transient clone (the
/// middleware clones per transform) leaves the sweeper running.
struct SweeperGuard(JoinHandle<()>);

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl InMemoryStore {
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder {
            sweep_interval: Some(Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS)),
            clock: SystemClock,
        }
    }

    /// Remove every record whose window has already ended.
    ///
    /// The background sweeper calls this periodically; expired records
    /// encountered by [record](CounterStore::record) are replaced in place, so
    /// sweeping only bounds the memory held by keys that stopped sending
    /// requests.
    pub fn sweep(&self, now: u64) {
        self.map.retain(|_k, counter| counter.reset > now);
    }

    fn sweeper<C: Clock + 'static>(
        map: Arc<DashMap<String, Counter>>,
        interval: Duration,
        clock: C,
    ) -> JoinHandle<()> {
        assert!(
            interval.as_secs_f64() > 0f64,
            "Sweep interval must be non-zero"
        );
        actix_web::rt::spawn(async move {
            loop {
                let now = clock.now_unix();
                map.retain(|_k, counter| counter.reset > now);
                actix_web::rt::time::sleep(interval).await;
            }
        })
    }
}

impl CounterStore for InMemoryStore {
    type Error = Infallible;

    async fn record(&self, key: &str, now: u64, window_end: u64) -> Result<Counter, Infallible> {
        let mut counter = Counter {
            hits: 1,
            reset: window_end,
        };
        self.map
            .entry(key.to_owned())
            .and_modify(|existing| {
                if existing.reset > now {
                    // Still within the window, count the hit.
                    existing.hits += 1;
                    counter = *existing;
                } else {
                    // The window has ended, restart the count on the new
                    // boundary.
                    *existing = counter;
                }
            })
            .or_insert(counter);
        Ok(counter)
    }

    async fn remove_key(&self, key: &str) -> Result<(), Infallible> {
        self.map.remove(key);
        Ok(())
    }
}

pub struct InMemoryStoreBuilder<C = SystemClock> {
    sweep_interval: Option<Duration>,
    clock: C,
}

impl<C: Clock + 'static> InMemoryStoreBuilder<C> {
    /// Override the default sweep interval.
    ///
    /// Set to None to disable the background sweeper.
    ///
    /// The sweeper periodically scans the internal map, removing expired
    /// counters.
    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// A sweeper reading time from `clock` instead of the system wall clock,
    /// so that sweep deadlines and record expiry share one timeline.
    pub fn with_clock<C2: Clock + 'static>(self, clock: C2) -> InMemoryStoreBuilder<C2> {
        InMemoryStoreBuilder {
            sweep_interval: self.sweep_interval,
            clock,
        }
    }

    pub fn build(self) -> InMemoryStore {
        let map = Arc::new(DashMap::<String, Counter>::new());
        let sweeper = self.sweep_interval.map(|interval| {
            Arc::new(SweeperGuard(InMemoryStore::sweeper(
                map.clone(),
                interval,
                self.clock,
            )))
        });
        InMemoryStore { map, sweeper }
    }
}
