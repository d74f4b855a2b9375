//! Cancellation-aware delays.
//!
//! Every periodic loop in the relay and the bridge (heartbeat, outbound
//! poller, pull-poller, build-poller) must wake up promptly on
//! cancellation instead of sleeping out a fixed interval. A raw
//! `tokio::time::sleep` is not acceptable on its own; it must always be
//! raced against the owning `CancellationToken`.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of an abort-aware sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The full duration elapsed.
    Elapsed,
    /// `token` was cancelled before the duration elapsed.
    Cancelled,
}

/// Sleeps for `duration` unless `token` is cancelled first.
pub async fn abort_aware_sleep(duration: Duration, token: &CancellationToken) -> SleepOutcome {
    tokio::select! {
        biased;
        () = token.cancelled() => SleepOutcome::Cancelled,
        () = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn elapses_when_not_cancelled() {
        let token = CancellationToken::new();
        let start = Instant::now();
        let outcome = abort_aware_sleep(Duration::from_millis(20), &token).await;
        assert_eq!(outcome, SleepOutcome::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn wakes_immediately_on_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let start = Instant::now();
        let outcome = abort_aware_sleep(Duration::from_secs(30), &token).await;
        assert_eq!(outcome, SleepOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn cancellation_mid_sleep_wakes_promptly() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let start = Instant::now();
        let outcome = abort_aware_sleep(Duration::from_secs(30), &token).await;
        assert_eq!(outcome, SleepOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
