//! Jittered timeouts and bounded retry backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Bounded retry schedule: attempt `n` waits `base * n` plus up to `jitter`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub max_attempts: u32,
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for Backoff {
    /// Three attempts, 2 s steps, 1.5 s jitter.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(2),
            jitter: Duration::from_millis(1500),
        }
    }
}

impl Backoff {
    pub fn new(max_attempts: u32, base: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts,
            base,
            jitter,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.base * attempt.max(1) + Duration::from_millis(jitter_ms)
    }
}

/// Uniform duration in `[min, max]`.
pub fn jittered(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    min + Duration::from_millis(rand_jitter_ms(span + 1))
}

/// Pseudo-random element of `items`.
pub fn pick<T>(items: &[T]) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    items.get(rand_jitter_ms(items.len() as u64) as usize)
}

// ---------------------------------------------------------------------------
// Jitter based on std; avoids pulling in the `rand` crate.
// xorshift seeded from the clock, mixed with a call counter so calls in the
// same nanosecond still differ.
// ---------------------------------------------------------------------------

static CALLS: AtomicU64 = AtomicU64::new(0x9E37_79B9_7F4A_7C15);

pub(crate) fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let mut x = nanos ^ CALLS.fetch_add(0x9E37_79B9_7F4A_7C15, Ordering::Relaxed);
    if x == 0 {
        x = 0x2545_F491_4F6C_DD1D;
    }
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
