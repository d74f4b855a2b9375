//! Exponential backoff with jitter for the relay's reconnect loop.
//!
//! ```text
//! delay  = min(initial_delay_ms * 2^attempt, max_delay_ms)
//! jitter = delay * uniform[0, 0.25)
//! result = round(delay + jitter)
//! ```
//!
//! `attempt` resets to 0 whenever the supervisor observes a successful
//! transition into `Online` (the heartbeat loop's first 2xx response).

/// Reconnection policy: bounds and base intervals for [`compute_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial_delay_ms: 1_000,
            max_delay_ms: 300_000,
        }
    }
}

/// Computes the delay, in milliseconds, before the `attempt`-th (0-indexed)
/// reconnect try.
pub fn compute_backoff(policy: BackoffPolicy, attempt: u32) -> u64 {
    compute_backoff_with_jitter(policy, attempt, fastrand::f64())
}

/// Same as [`compute_backoff`] but takes the jitter draw explicitly, so
/// callers (tests included) can pin it to a deterministic value in
/// `[0.0, 1.0)`.
pub fn compute_backoff_with_jitter(policy: BackoffPolicy, attempt: u32, jitter_draw: f64) -> u64 {
    debug_assert!((0.0..1.0).contains(&jitter_draw));

    let base = base_delay(policy, attempt);
    let jitter = (base as f64) * jitter_draw * 0.25;
    (base as f64 + jitter).round() as u64
}

fn base_delay(policy: BackoffPolicy, attempt: u32) -> u64 {
    let scaled = policy
        .initial_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    scaled.min(policy.max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: BackoffPolicy = BackoffPolicy {
        initial_delay_ms: 1_000,
        max_delay_ms: 300_000,
    };

    #[test]
    fn stays_within_base_and_1_25x_base_before_cap() {
        for attempt in 0..=20u32 {
            let base = base_delay(POLICY, attempt);
            for draw in [0.0, 0.37, 0.999] {
                let delay = compute_backoff_with_jitter(POLICY, attempt, draw);
                assert!(
                    delay >= base && (delay as f64) <= base as f64 * 1.25,
                    "attempt {attempt} draw {draw}: delay {delay} base {base}"
                );
            }
        }
    }

    #[test]
    fn after_cap_all_delays_lie_in_max_and_1_25x_max() {
        // initial_delay_ms * 2^attempt exceeds max_delay_ms well before attempt 20.
        for attempt in 9..=30u32 {
            let delay = compute_backoff_with_jitter(POLICY, attempt, 0.999);
            assert!(delay >= POLICY.max_delay_ms);
            assert!((delay as f64) <= POLICY.max_delay_ms as f64 * 1.25);
        }
    }

    #[test]
    fn zero_jitter_draw_returns_exactly_base() {
        for attempt in 0..10u32 {
            let base = base_delay(POLICY, attempt);
            assert_eq!(compute_backoff_with_jitter(POLICY, attempt, 0.0), base);
        }
    }

    #[test]
    fn does_not_overflow_on_large_attempt_counts() {
        let delay = compute_backoff_with_jitter(POLICY, u32::MAX, 0.5);
        assert!(delay >= POLICY.max_delay_ms);
    }
}
