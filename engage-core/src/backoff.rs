//! Exponential backoff with jitter.
//!
//! Shared by per-asset download retries and by the event flush cadence.
//! Jitter spreads retries out so that many clients recovering from the same
//! outage do not hit the server in lockstep.

use std::time::Duration;

/// Exponential backoff policy.
///
/// Formula: min(max, base * 2^(attempt - 1)) + random(0..=jitter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: Duration,
}

impl Backoff {
    /// Create a policy without jitter.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: Duration::ZERO,
        }
    }

    /// Add up to `jitter` of random delay to every non-zero backoff.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Attempt 0 means "no failure yet" and never waits.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        // Cap the exponent; 2^20 * base exceeds any sane cap already
        let factor = 1u32 << (attempt - 1).min(20);
        let exponential = self.base.saturating_mul(factor).min(self.max);

        exponential + random_jitter(self.jitter)
    }

    /// Upper bound on the delay, jitter included.
    pub fn max_delay(&self) -> Duration {
        self.max + self.jitter
    }
}

/// Generate random jitter between zero and `limit` inclusive.
fn random_jitter(limit: Duration) -> Duration {
    let limit_ms = limit.as_millis() as u64;
    if limit_ms == 0 {
        return Duration::ZERO;
    }

    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return Duration::ZERO;
    }
    let random = u64::from_le_bytes(bytes);
    Duration::from_millis(random % (limit_ms + 1))
}
