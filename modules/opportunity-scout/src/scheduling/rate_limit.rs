use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use tracing::debug;

use opportunity_common::file_config::RateLimitConfig;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket shared by every worker calling one rate-limited API.
///
/// Backed by a GCRA limiter: at most `capacity` requests can be issued
/// in a burst, and tokens come back continuously at `per_minute / 60`
/// per second rather than in a batch at the top of each minute.
pub struct RateLimiter {
    inner: DirectLimiter,
    per_minute: u32,
    capacity: u32,
    waits: AtomicU64,
}

impl RateLimiter {
    pub fn new(per_minute: u32, capacity: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(capacity.min(per_minute.get())).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            inner: governor::RateLimiter::direct(quota),
            per_minute: per_minute.get(),
            capacity: burst.get(),
            waits: AtomicU64::new(0),
        }
    }

    /// Standard or premium ceiling, picked once at construction.
    pub fn for_tier(config: &RateLimitConfig, premium: bool) -> Self {
        Self::new(config.per_minute(premium), config.capacity(premium))
    }

    /// Wait until a token is available. Never fails.
    pub async fn acquire(&self) {
        if self.inner.check().is_ok() {
            return;
        }
        self.waits.fetch_add(1, Ordering::Relaxed);
        debug!(per_minute = self.per_minute, "Rate limit reached, waiting for token");
        self.inner.until_ready().await;
    }

    /// Take a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.inner.check().is_ok()
    }

    pub fn per_minute(&self) -> u32 {
        self.per_minute
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// How many `acquire` calls had to wait.
    pub fn waits(&self) -> u64 {
        self.waits.load(Ordering::Relaxed)
    }
}
