use std::time::Duration;

use {outlook_config::RetryConfig, rand::Rng, reqwest::header::HeaderMap};

/// Bounded exponential backoff for 429, 5xx and transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `status` may be retried transparently. 401 never is.
    pub fn is_retryable(status: u16) -> bool {
        status == 429 || (500..600).contains(&status)
    }

    /// Delay before the attempt after `attempt` (1-based) failed.
    ///
    /// A server-sent `Retry-After` wins over the computed backoff but is
    /// still capped at the configured maximum.
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(wait) = retry_after {
            return wait.min(self.max);
        }
        let exp = self
            .multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1).min(32) as i32);
        let mut delay = self.base.as_secs_f64() * exp;
        if self.jitter {
            delay *= rand::rng().random_range(0.5..=1.0);
        }
        Duration::from_secs_f64(delay.min(self.max.as_secs_f64()))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base: Duration::from_millis(cfg.base_delay_ms),
            max: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
            jitter: cfg.jitter,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
