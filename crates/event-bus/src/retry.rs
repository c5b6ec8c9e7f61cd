use std::time::Duration;

/// Bounded in-place retry for a single delivery.
///
/// `max_attempts` counts every call to the handler, the first one included.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Retries immediately; useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::default()
            .max_attempts(max_attempts)
            .initial_backoff(Duration::ZERO)
            .max_backoff(Duration::ZERO)
    }

    /// Delay before the retry that follows failed attempt number `attempt`
    /// (1-based), capped at `max_backoff`.
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let backoff = Duration::from_millis(millis as u64);
        backoff.min(self.max_backoff)
    }
}
