//! Retry (backoff) policy.
//!
//! Deliberately simple: a flat 10-second delay on the first failure, a
//! flat 30-second delay on every failure after that. No exponential
//! growth, no jitter, and the history behind the schedule is never
//! persisted. A restart always starts a request fresh.

use std::time::Duration;

pub(crate) const FIRST_RETRY_DELAY: Duration = Duration::from_secs(10);
pub(crate) const SUBSEQUENT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// The delay to apply given whether this request has ever failed
/// before (`retry_time != NEVER_RETRIED`).
pub(crate) fn next_delay(has_failed_before: bool) -> Duration {
    if has_failed_before {
        SUBSEQUENT_RETRY_DELAY
    } else {
        FIRST_RETRY_DELAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_is_ten_seconds() {
        assert_eq!(next_delay(false), Duration::from_secs(10));
    }

    #[test]
    fn subsequent_failures_are_thirty_seconds() {
        assert_eq!(next_delay(true), Duration::from_secs(30));
    }
}
