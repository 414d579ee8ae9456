//! Retry policy: decides how long to wait between connection attempts.

use rand::Rng;
use std::time::Duration;

/// Retry policy for connection acquisition.
///
/// Startup uses a fixed delay with no attempt limit; inline healing uses the same
/// delay but gives up after a few attempts so a request cannot hang forever.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Backoff multiplier. 1.0 keeps the delay fixed.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Fraction of the delay added or removed at random (0.0 = none).
    pub jitter: f64,

    /// `None` retries until success (or shutdown).
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Fixed delay, unbounded.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: 0.0,
            max_attempts: None,
        }
    }

    /// Startup policy: retry every 5 seconds until the backend shows up.
    pub fn startup() -> Self {
        Self::fixed(Duration::from_secs(5))
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.multiplier = multiplier.max(1.0);
        self.max_delay = max_delay.max(self.base_delay);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Has the policy run out after `attempts` failed attempts?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Delay before the next attempt.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay), then jitter.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = (base_secs * self.multiplier.powi(exponent))
            .min(self.max_delay.as_secs_f64());

        if self.jitter <= 0.0 || delay_secs <= 0.0 {
            return Duration::from_secs_f64(delay_secs);
        }
        let spread = delay_secs * self.jitter;
        let jittered = rand::thread_rng().gen_range((delay_secs - spread)..=(delay_secs + spread));
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::startup()
    }
}
