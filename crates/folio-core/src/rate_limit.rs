//! Per-key action rate limiting.
//!
//! An explicit context object: whoever needs rate limiting owns an
//! [`ActionRateLimiter`] and passes it where needed. There is no process-wide
//! instance, so tests never observe each other's counters.

use std::num::NonZeroU32;
use std::sync::{RwLock, RwLockReadGuard};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tracing::debug;

type KeyedLimiter<C> = RateLimiter<
    String,
    DefaultKeyedStateStore<String>,
    C,
    NoOpMiddleware<<C as Clock>::Instant>,
>;

/// Allows a burst of `max_actions` per key, replenished at `max_actions`
/// per `window`.
pub struct ActionRateLimiter<C: Clock = DefaultClock> {
    max_actions: NonZeroU32,
    window: Duration,
    quota: Quota,
    clock: C,
    limiter: RwLock<KeyedLimiter<C>>,
}

impl ActionRateLimiter {
    /// `max_actions` of 0 is treated as 1.
    pub fn new(max_actions: u32, window: Duration) -> Self {
        Self::with_clock(max_actions, window, DefaultClock::default())
    }
}

impl<C: Clock> ActionRateLimiter<C> {
    pub fn with_clock(max_actions: u32, window: Duration, clock: C) -> Self {
        let max_actions = NonZeroU32::new(max_actions).unwrap_or(NonZeroU32::MIN);
        let quota = window
            .checked_div(max_actions.get())
            .and_then(Quota::with_period)
            .unwrap_or_else(|| Quota::per_second(max_actions))
            .allow_burst(max_actions);
        let limiter = RateLimiter::new(quota, DefaultKeyedStateStore::default(), &clock);

        Self {
            max_actions,
            window,
            quota,
            clock,
            limiter: RwLock::new(limiter),
        }
    }

    pub fn max_actions(&self) -> u32 {
        self.max_actions.get()
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn limiter(&self) -> RwLockReadGuard<'_, KeyedLimiter<C>> {
        self.limiter.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Record an action for `key`. Returns `false` if the key is over its limit;
    /// refused actions are not recorded.
    pub fn try_acquire(&self, key: &str) -> bool {
        let allowed = self.limiter().check_key(&key.to_string()).is_ok();
        if !allowed {
            debug!(key, max_actions = self.max_actions.get(), "Rate limit reached");
        }
        allowed
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.limiter().len()
    }

    /// Forget every counter.
    pub fn reset(&self) {
        let fresh = RateLimiter::new(self.quota, DefaultKeyedStateStore::default(), &self.clock);
        *self.limiter.write().unwrap_or_else(|e| e.into_inner()) = fresh;
    }
}

impl<C: Clock> std::fmt::Debug for ActionRateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRateLimiter")
            .field("max_actions", &self.max_actions)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn limiter(max: u32, window_secs: u64) -> (ActionRateLimiter<FakeRelativeClock>, FakeRelativeClock) {
        let clock = FakeRelativeClock::default();
        let limiter =
            ActionRateLimiter::with_clock(max, Duration::from_secs(window_secs), clock.clone());
        (limiter, clock)
    }

    #[test]
    fn test_allows_burst_up_to_limit() {
        let (limiter, _) = limiter(3, 60);
        assert!(limiter.try_acquire("doc"));
        assert!(limiter.try_acquire("doc"));
        assert!(limiter.try_acquire("doc"));
        assert!(!limiter.try_acquire("doc"));
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _) = limiter(1, 60);
        assert!(limiter.try_acquire("a"));
        assert!(limiter.try_acquire("b"));
        assert!(!limiter.try_acquire("a"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_replenishes_over_window() {
        let (limiter, clock) = limiter(2, 10);
        assert!(limiter.try_acquire("doc"));
        assert!(limiter.try_acquire("doc"));

        clock.advance(Duration::from_secs(4));
        assert!(!limiter.try_acquire("doc"));

        // One action back every window / max_actions.
        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_acquire("doc"));
        assert!(!limiter.try_acquire("doc"));

        clock.advance(Duration::from_secs(10));
        assert!(limiter.try_acquire("doc"));
        assert!(limiter.try_acquire("doc"));
    }

    #[test]
    fn test_reset() {
        let (limiter, _) = limiter(1, 60);
        assert!(limiter.try_acquire("a"));
        assert!(!limiter.try_acquire("a"));
        limiter.reset();
        assert_eq!(limiter.tracked_keys(), 0);
        assert!(limiter.try_acquire("a"));
    }

    #[test]
    fn test_zero_limit_means_one() {
        let limiter = ActionRateLimiter::new(0, Duration::from_secs(60));
        assert_eq!(limiter.max_actions(), 1);
        assert!(limiter.try_acquire("doc"));
        assert!(!limiter.try_acquire("doc"));
    }
}
