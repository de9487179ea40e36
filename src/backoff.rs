use rand::Rng;
use std::time::Duration;

/// Linear backoff with bounded jitter.
///
/// The wait for attempt `a` (0-based) is `base * (a + 1)` plus a random
/// `0..=jitter` seconds. Jitter is kept strictly below `base`, so waits for
/// consecutive attempts always strictly increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_secs: u64,
    jitter_secs: u64,
}

impl BackoffPolicy {
    pub fn new(base_secs: u64, jitter_secs: u64) -> Self {
        let base_secs = base_secs.max(1);
        Self {
            base_secs,
            jitter_secs: jitter_secs.min(base_secs - 1),
        }
    }

    pub fn base_secs(&self) -> u64 {
        self.base_secs
    }

    pub fn jitter_secs(&self) -> u64 {
        self.jitter_secs
    }

    /// Deterministic lower bound for `attempt`.
    pub fn floor(&self, attempt: usize) -> u64 {
        self.base_secs.saturating_mul(attempt as u64 + 1)
    }

    /// Seconds to wait before retrying after failed `attempt`.
    pub fn next_wait(&self, attempt: usize) -> u64 {
        self.next_wait_with(attempt, &mut rand::rng())
    }

    pub fn next_wait_with<R: Rng + ?Sized>(&self, attempt: usize, rng: &mut R) -> u64 {
        let jitter = if self.jitter_secs == 0 {
            0
        } else {
            rng.random_range(0..=self.jitter_secs)
        };
        self.floor(attempt).saturating_add(jitter)
    }

    pub fn next_delay(&self, attempt: usize) -> Duration {
        Duration::from_secs(self.next_wait(attempt))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(5, 2)
    }
}
