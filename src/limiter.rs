use crate::clock::{Clock, SystemClock};
use crate::config::ConfigError;
use crate::store::CounterStore;

/// A validated rate limit policy: `limit` requests per `period` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    limit: u64,
    period: u64,
}

impl Quota {
    /// # Arguments
    ///
    /// * `limit`: Requests allowed per window. A limit of zero denies every
    ///   request.
    /// * `period`: Window length in whole seconds; must be at least one. A
    ///   zero period has no meaningful window arithmetic and is rejected
    ///   here, at setup, never at request time.
    pub fn new(limit: u64, period: u64) -> Result<Self, ConfigError> {
        if period == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        Ok(Quota { limit, period })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn period(&self) -> u64 {
        self.period
    }
}

/// The outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request should be allowed through.
    pub allowed: bool,
    /// Requests left in the current window, never negative.
    pub remaining: u64,
    /// The limit the decision was evaluated against.
    pub limit: u64,
    /// Unix timestamp at which the current window ends.
    pub reset_at: u64,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Seconds from `now` until the window ends, or 0 if it already has.
    pub fn seconds_until_reset(&self, now: u64) -> u64 {
        self.reset_at.saturating_sub(now)
    }
}

/// Decides whether requests may proceed, counting hits in a [CounterStore].
///
/// The limiter holds no counter state of its own, only a handle to the store,
/// a default [Quota] and a clock; cloning it shares the underlying store. The
/// store is fixed for the limiter's lifetime.
///
/// Windows are aligned to absolute multiples of the period since the Unix
/// epoch, not to each key's first hit. This keeps the state at one counter
/// per key, at the cost of the well-known fixed window boundary burst: a
/// client can send up to twice the limit across two adjacent windows.
#[derive(Clone)]
pub struct Limiter<S, C = SystemClock> {
    store: S,
    quota: Quota,
    clock: C,
}

impl<S: CounterStore> Limiter<S> {
    pub fn new(store: S, quota: Quota) -> Self {
        Limiter {
            store,
            quota,
            clock: SystemClock,
        }
    }
}

impl<S: CounterStore, C: Clock> Limiter<S, C> {
    /// A limiter reading time from `clock` instead of the system wall clock.
    pub fn with_clock(store: S, quota: Quota, clock: C) -> Self {
        Limiter {
            store,
            quota,
            clock,
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Record one hit for `key` against the default quota and decide whether
    /// the request may proceed.
    ///
    /// With the in-memory store this never blocks on I/O; with the Redis
    /// store it performs one network round trip. A store failure is returned
    /// as an error, never mapped onto a decision.
    pub async fn check(&self, key: &str) -> Result<Decision, S::Error> {
        self.check_with(key, self.quota).await
    }

    /// Record one hit for `key` against an explicit quota, overriding the
    /// default. Keys counted under different quotas should not be shared.
    pub async fn check_with(&self, key: &str, quota: Quota) -> Result<Decision, S::Error> {
        let now = self.clock.now_unix();
        // Windows are aligned to multiples of the period, so a fresh window
        // may end less than a full period from now.
        let window_end = (now / quota.period + 1) * quota.period;
        let counter = self.store.record(key, now, window_end).await?;
        Ok(Decision {
            allowed: counter.hits <= quota.limit,
            remaining: quota.limit.saturating_sub(counter.hits),
            limit: quota.limit,
            reset_at: counter.reset,
        })
    }

    /// Forget a key entirely, restarting its window on the next check.
    pub async fn reset_key(&self, key: &str) -> Result<(), S::Error> {
        self.store.remove_key(key).await
    }
}

#[cfg(all(test, feature = "dashmap"))]
mod tests {
    use super::*;
    use crate::clock::test::ManualClock;
    use crate::store::memory::InMemoryStore;

    fn limiter(
        limit: u64,
        period: u64,
        clock: &ManualClock,
    ) -> Limiter<InMemoryStore, ManualClock> {
        let store = InMemoryStore::builder().with_sweep_interval(None).build();
        Limiter::with_clock(store, Quota::new(limit, period).unwrap(), clock.clone())
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(matches!(Quota::new(10, 0), Err(ConfigError::InvalidPeriod)));
    }

    #[actix_web::test]
    async fn test_remaining_counts_down_then_denies() {
        let clock = ManualClock::start_at(1_000_005);
        let limiter = limiter(10, 30, &clock);
        // Ten hits within one window count down from 9 to 0, all allowed.
        for expected in (0..10).rev() {
            let decision = limiter.check("op/1.2.3.4").await.unwrap();
            assert!(decision.is_allowed());
            assert_eq!(decision.remaining, expected);
            assert_eq!(decision.limit, 10);
            assert_eq!(decision.reset_at, 1_000_020);
        }
        // The eleventh is denied, with the same window end.
        let decision = limiter.check("op/1.2.3.4").await.unwrap();
        assert!(decision.is_denied());
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, 1_000_020);
    }

    #[actix_web::test]
    async fn test_window_rollover() {
        let clock = ManualClock::start_at(1_000_005);
        let limiter = limiter(2, 30, &clock);
        let first = limiter.check("KEY1").await.unwrap();
        assert_eq!(first.reset_at, 1_000_020);

        // Reaching the boundary starts a new window one period later.
        clock.advance(15);
        let second = limiter.check("KEY1").await.unwrap();
        assert!(second.is_allowed());
        assert_eq!(second.remaining, 1);
        assert_eq!(second.reset_at, first.reset_at + 30);
    }

    #[actix_web::test]
    async fn test_windows_are_epoch_aligned() {
        let clock = ManualClock::start_at(95);
        let limiter = limiter(5, 10, &clock);
        // First hit at t=95 falls in the [90, 100) window, so the window ends
        // only 5 seconds later, not a full period from now.
        let decision = limiter.check("KEY1").await.unwrap();
        assert_eq!(decision.reset_at, 100);
        assert_eq!(decision.seconds_until_reset(95), 5);
    }

    #[actix_web::test]
    async fn test_boundary_burst_is_permitted() {
        // The documented fixed window trade-off: with limit 1 and period 10,
        // hits at t=9 and t=10 land in adjacent windows and are both allowed.
        let clock = ManualClock::start_at(9);
        let limiter = limiter(1, 10, &clock);
        assert!(limiter.check("KEY1").await.unwrap().is_allowed());
        clock.set(10);
        assert!(limiter.check("KEY1").await.unwrap().is_allowed());
    }

    #[actix_web::test]
    async fn test_zero_limit_denies_everything() {
        let clock = ManualClock::start_at(50);
        let limiter = limiter(0, 10, &clock);
        for _ in 0..3 {
            let decision = limiter.check("KEY1").await.unwrap();
            assert!(decision.is_denied());
            assert_eq!(decision.remaining, 0);
        }
    }

    #[actix_web::test]
    async fn test_keys_do_not_interfere() {
        let clock = ManualClock::start_at(50);
        let limiter = limiter(1, 60, &clock);
        assert!(limiter.check("KEY1").await.unwrap().is_allowed());
        assert!(limiter.check("KEY1").await.unwrap().is_denied());
        // A different key still has its full quota.
        assert!(limiter.check("KEY2").await.unwrap().is_allowed());
    }

    #[actix_web::test]
    async fn test_quota_override() {
        let clock = ManualClock::start_at(50);
        let limiter = limiter(10, 30, &clock);
        let strict = Quota::new(1, 600).unwrap();
        let decision = limiter.check_with("token", strict).await.unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.limit, 1);
        assert!(limiter.check_with("token", strict).await.unwrap().is_denied());
    }

    #[actix_web::test]
    async fn test_reset_key() {
        let clock = ManualClock::start_at(50);
        let limiter = limiter(1, 60, &clock);
        assert!(limiter.check("KEY1").await.unwrap().is_allowed());
        assert!(limiter.check("KEY1").await.unwrap().is_denied());
        limiter.reset_key("KEY1").await.unwrap();
        assert!(limiter.check("KEY1").await.unwrap().is_allowed());
    }
}
