// Retry policy and rate-limit backoff state for one job run

use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential backoff used between rate-limited calls.
///
/// `current` grows by `multiplier` after every use and never exceeds `cap`.
#[derive(Debug, Clone)]
pub struct RateLimitBackoff {
    base: Duration,
    cap: Duration,
    multiplier: f64,
    jitter_factor: f64,
    current: Duration,
}

impl RateLimitBackoff {
    pub fn new(base: Duration, cap: Duration, multiplier: f64) -> Self {
        Self {
            base,
            cap,
            multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
            jitter_factor: 0.0,
            current: base.min(cap),
        }
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor.clamp(0.0, 1.0);
        self
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before the next call: the server hint if any, else the internal
    /// backoff, capped either way. The internal backoff grows regardless.
    pub fn next_rate_limit_delay(&mut self, server_hint: Option<Duration>) -> Duration {
        let delay = server_hint.unwrap_or(self.current).min(self.cap);
        self.current = self.current.mul_f64(self.multiplier).min(self.cap);
        self.apply_jitter(delay)
    }

    pub fn reset(&mut self) {
        self.current = self.base.min(self.cap);
    }

    // Spread the delay by +/- jitter_factor/2 to avoid lockstep retries
    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay;
        }
        let ms = delay.as_millis() as f64;
        let jitter = rand::random::<f64>() * self.jitter_factor * ms;
        let jittered = ms * (1.0 - self.jitter_factor / 2.0) + jitter;
        Duration::from_millis(jittered as u64).min(self.cap)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub retry_on_taken_slot: bool,
    pub backoff: RateLimitBackoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, backoff: RateLimitBackoff) -> Self {
        Self {
            max_attempts,
            delay,
            retry_on_taken_slot: true,
            backoff,
        }
    }

    /// Fresh policy for one job run.
    pub fn from_config(config: &RetryConfig) -> Self {
        let backoff = RateLimitBackoff::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.backoff_multiplier,
        )
        .with_jitter(config.jitter_factor);

        Self {
            max_attempts: config.n_retries,
            delay: Duration::from_millis(config.retry_delay_ms),
            retry_on_taken_slot: config.retry_on_taken_slot,
            backoff,
        }
    }
}

/// `base * 2^attempt`, capped. Attempt 0 waits `base`.
pub fn exponential_backoff(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    base.saturating_mul(factor).min(cap)
}
