//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use zonewall_common::config::RetryConfig;

/// Delay before retry number `attempt` (1-based), jittered to 0.5x-1.5x of
/// the exponential delay and capped at the configured maximum.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.delay_for(attempt);
    let jitter = rand::rng().random_range(0.5..1.5);
    Duration::from_secs_f64(base.as_secs_f64() * jitter).min(config.max_delay)
}
