//! Rate limiting utilities

use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;
use uuid::Uuid;

/// Minimum spacing between accepted inputs from one connection (one tick)
pub const MIN_INPUT_INTERVAL: Duration = Duration::from_millis(16);

/// Quota admitting a single cell per `interval`, with no burst allowance
pub fn interval_quota(interval: Duration) -> Quota {
    Quota::with_period(interval).unwrap_or(Quota::per_second(NonZeroU32::MAX))
}

/// Direct limiter driven by clock `C`
pub type DirectLimiter<C> =
    RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Per-connection minimum inter-arrival limiter.
///
/// Each connection gets its own direct governor limiter; the map is the
/// only bookkeeping and shrinks again through [`remove`](Self::remove).
pub struct ConnectionRateLimiter<C: Clock = DefaultClock> {
    quota: Quota,
    clock: C,
    limiters: HashMap<Uuid, DirectLimiter<C>>,
}

impl<C: Clock> ConnectionRateLimiter<C> {
    pub fn with_clock(interval: Duration, clock: C) -> Self {
        Self {
            quota: interval_quota(interval),
            clock,
            limiters: HashMap::new(),
        }
    }

    /// Check if a message from this connection is allowed (returns true if allowed)
    pub fn check(&mut self, connection_id: Uuid) -> bool {
        let quota = self.quota;
        let clock = &self.clock;
        self.limiters
            .entry(connection_id)
            .or_insert_with(|| DirectLimiter::<C>::direct_with_clock(quota, clock))
            .check()
            .is_ok()
    }

    /// Forget a connection's limiter
    pub fn remove(&mut self, connection_id: &Uuid) {
        self.limiters.remove(connection_id);
    }

    /// Number of connections currently tracked
    pub fn len(&self) -> usize {
        self.limiters.len()
    }
}
