//! Backoff delay computation for rate-limited retries.
//!
//! Adapted from the sibling crates' `RetryConfig::delay_for_attempt`,
//! generalized to support both the exponential-with-jitter shape
//! (balanced mode) and the linear-with-jitter shape (best-quality mode)
//! from a single formula, selected by `multiplier`.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Compute the backoff delay for retry attempt `attempt` (1-based).
///
/// `multiplier > 1.0` selects exponential backoff:
/// `d = min(base * multiplier^(attempt-1), max)`.
/// `multiplier == 1.0` selects linear backoff: `d = min(base * attempt, max)`.
///
/// A symmetric jitter of `±jitter` is then applied and the result is
/// floored at zero.
pub fn delay_for_attempt(cfg: BackoffConfig, attempt: u32) -> Duration {
    let a = attempt.max(1) as f64;
    let raw_delay = if cfg.multiplier > 1.0 {
        cfg.base_delay_ms as f64 * cfg.multiplier.powf(a - 1.0)
    } else {
        cfg.base_delay_ms as f64 * a
    };
    let delay_ms = raw_delay.min(cfg.max_delay_ms as f64);

    let jitter_factor: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
    let jittered = delay_ms + delay_ms * cfg.jitter * jitter_factor;
    let floored = jittered.max(0.0).floor() as u64;

    Duration::from_millis(floored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingMode;

    fn within_jitter(actual_ms: u64, expected_ms: f64, jitter: f64) {
        let lo = (expected_ms * (1.0 - jitter)).floor() as u64;
        let hi = (expected_ms * (1.0 + jitter)).ceil() as u64;
        assert!(
            actual_ms >= lo.saturating_sub(1) && actual_ms <= hi + 1,
            "expected {actual_ms} within [{lo}, {hi}] (target {expected_ms})"
        );
    }

    #[test]
    fn balanced_backoff_is_exponential_with_cap() {
        let cfg = ProcessingMode::Balanced.config().backoff;
        within_jitter(delay_for_attempt(cfg, 1).as_millis() as u64, 2000.0, 0.30);
        within_jitter(delay_for_attempt(cfg, 2).as_millis() as u64, 5000.0, 0.30);
        within_jitter(delay_for_attempt(cfg, 3).as_millis() as u64, 10000.0, 0.30);
        // attempt 4 would exceed the cap without clamping
        assert!(delay_for_attempt(cfg, 4).as_millis() <= 13_000);
    }

    #[test]
    fn best_quality_backoff_is_linear_with_cap() {
        let cfg = ProcessingMode::BestQuality.config().backoff;
        within_jitter(delay_for_attempt(cfg, 1).as_millis() as u64, 5000.0, 0.20);
        within_jitter(delay_for_attempt(cfg, 2).as_millis() as u64, 10000.0, 0.20);
    }

    #[test]
    fn delay_never_goes_negative() {
        let cfg = BackoffConfig { base_delay_ms: 0, max_delay_ms: 10, multiplier: 2.0, jitter: 1.0 };
        for attempt in 1..5 {
            let d = delay_for_attempt(cfg, attempt);
            assert!(d.as_millis() >= 0);
        }
    }
}
