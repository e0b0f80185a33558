//! Retry backoff policy and the cancellable single-shot timer.
//!
//! The delay formula is shared by the SDK-level initialization retry and the
//! per-module initialization retries; both read their base/limit parameters
//! from the current app config. The timer primitive is used wherever a retry
//! must be scheduled while remaining cancellable by a newer call or teardown.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Returns the delay to wait before retry number `retry_number` (1-based).
///
/// The delay doubles on every retry starting from `base` and is capped at
/// `limit`. E.g. for `base = 1s`, `limit = 30s`, and retry numbers 1 through
/// 8, the delays are 1, 2, 4, 8, 16, 30, 30, 30 seconds.
pub fn retry_delay(retry_number: u32, base: Duration, limit: Duration) -> Duration {
    // Saturate the exponent so large retry numbers clamp at the limit
    // instead of overflowing the multiplication.
    let factor = 1u32
        .checked_shl(retry_number.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(limit)
}

/// A cancellable single-shot timer.
///
/// The callback fires exactly once after the delay elapses, unless `cancel`
/// is called first, in which case it never fires. Owners keep at most one
/// live timer at a time and replace it when scheduling a new retry.
#[derive(Debug)]
pub struct RetryTimer {
    /// Handle for the spawned sleeper task; aborted on cancellation.
    handle: JoinHandle<()>,
}

impl RetryTimer {
    /// Schedules `callback` to run once after `delay`.
    pub fn schedule<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            callback();
        });
        Self { handle }
    }

    /// Cancels the timer so the callback never gets fired.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Pins the documented delay progression for the default base/limit values.
    #[test]
    fn retry_delay_progression_is_capped() {
        let base = Duration::from_secs(1);
        let limit = Duration::from_secs(30);
        let delays: Vec<u64> = (1..=8)
            .map(|n| retry_delay(n, base, limit).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    /// Verifies huge retry numbers do not overflow and stay at the limit.
    #[test]
    fn retry_delay_saturates_for_large_retry_numbers() {
        let base = Duration::from_secs(2);
        let limit = Duration::from_secs(45);
        assert_eq!(retry_delay(64, base, limit), limit);
        assert_eq!(retry_delay(u32::MAX, base, limit), limit);
    }

    /// Ensures the delay for the first retry equals the base value.
    #[test]
    fn retry_delay_first_retry_uses_base() {
        assert_eq!(
            retry_delay(1, Duration::from_millis(500), Duration::from_secs(30)),
            Duration::from_millis(500)
        );
    }

    /// A scheduled timer fires its callback exactly once after the delay.
    #[tokio::test(start_paused = true)]
    async fn timer_fires_once_after_delay() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        let _timer = RetryTimer::schedule(Duration::from_secs(5), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0, "timer fired early");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    /// A cancelled timer never runs its callback.
    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        let timer = RetryTimer::schedule(Duration::from_secs(5), move || {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
