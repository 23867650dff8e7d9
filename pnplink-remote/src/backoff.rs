use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Wait for the given delay before trying again
    Retry(Duration),

    /// Give up on this connection sequence
    Exhausted,
}

/// Exponential backoff with full jitter
///
/// One `RetryState` covers a single connection sequence. The ceiling starts
/// at the base delay and doubles with every failure up to the max delay,
/// the actual delay is picked uniformly between zero and the ceiling.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempts: u32,
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl RetryState {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            attempts: 0,
            base: config.base,
            max: config.max,
            max_attempts: config.max_attempts.get(),
        }
    }

    /// Number of failed attempts recorded so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record a failed attempt and compute the delay before the next one
    ///
    /// Returns `Exhausted` once `max_attempts` failures have been recorded,
    /// the counter never goes past that.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Backoff {
        if self.attempts < self.max_attempts {
            self.attempts += 1;
        }
        if self.attempts >= self.max_attempts {
            return Backoff::Exhausted;
        }

        let ceiling = self.ceiling().as_millis() as u64;
        Backoff::Retry(Duration::from_millis(rng.random_range(0..=ceiling)))
    }

    // min(max, base * 2^(attempts - 1))
    fn ceiling(&self) -> Duration {
        let exp = self.attempts.saturating_sub(1);
        2u32.checked_pow(exp)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
