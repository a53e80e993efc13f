use std::time::Duration;

/// Settings of the reconciliation controller.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Concurrent reconcile workers per resource kind.
    ///
    /// Workers never process the same resource at the same time.
    pub workers: usize,
    /// How often declared state is re-read from its source, if at all.
    pub resync: Option<Duration>,
    /// Backoff applied to failed reconciles.
    pub retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync: None,
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff with jitter for operations that fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Log output settings of the binary.
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `info` or `zonewall_core=debug`.
    pub level: String,
    /// Emit one JSON object per line instead of human readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
