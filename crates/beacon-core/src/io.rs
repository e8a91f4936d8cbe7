//! I/O abstraction for time and randomness
//!
//! All code that reads the clock, sleeps, or needs jitter goes through
//! these traits. Production uses the wall clock and a cheap xorshift
//! RNG; tests inject a manually-advanced `SimClock` and a seeded RNG
//! so timing-dependent behavior is reproducible.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// Never call `SystemTime::now()` or `tokio::time::sleep` directly in
/// registry code; use this trait so tests can control time.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);
}

/// Production time provider backed by the system clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

// ============================================================================
// Simulated Clock
// ============================================================================

/// Deterministic clock for tests
///
/// Time only moves when `advance_ms` is called; sleepers wake once the
/// simulated clock passes their deadline.
#[derive(Debug, Clone)]
pub struct SimClock {
    /// Current time in milliseconds since epoch
    current_time_ms: Arc<AtomicU64>,
    /// Wakes sleepers when time advances
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a clock starting at the given millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Advance time by the given number of milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

impl Default for SimClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC, for predictable test timestamps
        Self::from_millis(1_704_067_200_000)
    }
}

#[async_trait]
impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        let target_ms = self.now_ms().saturating_add(ms);
        while self.now_ms() < target_ms {
            self.notify.notified().await;
        }
    }
}

// ============================================================================
// RNG Provider
// ============================================================================

/// Random number generator abstraction
///
/// Used for backoff jitter; not cryptographically secure.
pub trait RngProvider: Send + Sync + std::fmt::Debug {
    /// Generate a random u64
    fn next_u64(&self) -> u64;

    /// Generate a random u64 in range [min, max)
    fn gen_range(&self, min: u64, max: u64) -> u64 {
        assert!(min < max, "min must be less than max");
        min + (self.next_u64() % (max - min))
    }
}

/// Production RNG provider
///
/// Atomic xorshift64* state, lock-free and thread-safe.
#[derive(Debug)]
pub struct StdRngProvider {
    state: AtomicU64,
}

impl StdRngProvider {
    /// Create a new RNG provider seeded from system time
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
            | 1;

        Self {
            state: AtomicU64::new(seed),
        }
    }

    /// Create with a specific seed (for testing)
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed | 1),
        }
    }
}

impl Default for StdRngProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RngProvider for StdRngProvider {
    fn next_u64(&self) -> u64 {
        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let mut x = state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;

            match self
                .state
                .compare_exchange_weak(state, x, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return x.wrapping_mul(0x2545F4914F6CDD1D),
                Err(s) => state = s,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_clock_now_ms() {
        let clock = WallClockTime::new();
        let now = clock.now_ms();
        assert!(now > 1_577_836_800_000); // after Jan 1, 2020

        let now2 = clock.now_ms();
        assert!(now2 >= now);
    }

    #[tokio::test]
    async fn test_wall_clock_sleep() {
        let clock = WallClockTime::new();
        let start = clock.now_ms();
        clock.sleep_ms(10).await;
        assert!(clock.now_ms() - start >= 9);
    }

    #[test]
    fn test_sim_clock_advance() {
        let clock = SimClock::from_millis(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);
    }

    #[tokio::test]
    async fn test_sim_clock_sleep_wakes_on_advance() {
        let clock = SimClock::from_millis(0);
        let sleeper = clock.clone();

        let handle = tokio::spawn(async move {
            sleeper.sleep_ms(100).await;
            sleeper.now_ms()
        });

        tokio::task::yield_now().await;
        clock.advance_ms(60);
        tokio::task::yield_now().await;
        clock.advance_ms(60);

        let woke_at = handle.await.unwrap();
        assert!(woke_at >= 100);
    }

    #[test]
    fn test_rng_deterministic_with_seed() {
        let rng1 = StdRngProvider::with_seed(12345);
        let rng2 = StdRngProvider::with_seed(12345);
        assert_eq!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_rng_gen_range() {
        let rng = StdRngProvider::with_seed(42);
        for _ in 0..100 {
            let value = rng.gen_range(10, 20);
            assert!((10..20).contains(&value));
        }
    }
}
