//! Exponential backoff

use crate::config::RetryConfig;
use crate::time::JitterSource;
use std::time::Duration;

/// De-jittered delay before retry number `attempt` (1-based)
///
/// `min(max_delay, base_delay * multiplier^(attempt - 1))`. Non-decreasing in
/// `attempt` for any multiplier of at least 1.
pub fn expected_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let max = config.max_delay_ms;
    let base = config.base_delay_ms.min(max);
    let multiplier = config.backoff_multiplier.max(1.0);
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);

    let scaled = base as f64 * multiplier.powi(exponent);
    let millis = if scaled.is_finite() && scaled < max as f64 {
        scaled as u64
    } else {
        max
    };
    Duration::from_millis(millis.min(max))
}

/// Delay actually slept before retry number `attempt`
pub fn jittered_delay(config: &RetryConfig, attempt: u32, jitter: &dyn JitterSource) -> Duration {
    let expected = expected_delay(config, attempt);
    if config.jitter {
        expected.mul_f64(jitter.factor())
    } else {
        expected
    }
}
