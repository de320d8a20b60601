//! Retry-until-ready primitive for server-side preparation.

use std::future::Future;
use std::time::Duration;

use itemxfer_settings::PollSettings;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Shortest delay [`poll_until`] sleeps between checks.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Interval, backoff and deadline for [`poll_until`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the first re-check.
    pub interval: Duration,
    /// Overall deadline. `None` polls until cancelled.
    pub max_wait: Option<Duration>,
    /// Multiplier applied to the delay after each re-check.
    pub backoff_factor: f64,
    /// Backoff cap.
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl From<&PollSettings> for PollPolicy {
    fn from(settings: &PollSettings) -> Self {
        Self {
            interval: Duration::from_millis(settings.interval_ms),
            max_wait: settings.max_wait_ms.map(Duration::from_millis),
            backoff_factor: settings.backoff_factor,
            max_interval: Duration::from_millis(settings.max_interval_ms),
        }
    }
}

impl PollPolicy {
    /// Fixed delay, no deadline.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
            backoff_factor: 1.0,
            max_interval: interval,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff_factor = factor;
        self.max_interval = max_interval;
        self
    }

    /// Delay before re-check number `attempt` (1-based), never below
    /// [`MIN_INTERVAL`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let interval = self.interval.max(MIN_INTERVAL);
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = interval.as_secs_f64() * self.backoff_factor.max(1.0).powi(exp);
        let cap = self.max_interval.max(interval).as_secs_f64();
        Duration::from_secs_f64(secs.min(cap))
    }
}

/// Why [`poll_until`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum PollError<E> {
    #[error("not ready after {waited:?}")]
    Timeout { waited: Duration },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(E),
}

/// Calls `check` until it yields `Some`, sleeping between calls.
///
/// The first check runs immediately. Both the check and the sleep race
/// against `cancel`. Once `policy.max_wait` has elapsed the loop stops
/// with [`PollError::Timeout`]; the last sleep is shortened to end on the
/// deadline so one final check happens there.
pub async fn poll_until<T, E, F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let deadline = policy.max_wait.map(|wait| start + wait);
    let mut attempt = 0u32;

    loop {
        let checked = tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            checked = check() => checked,
        };
        if let Some(value) = checked.map_err(PollError::Failed)? {
            return Ok(value);
        }

        attempt += 1;
        let mut delay = policy.delay_for_attempt(attempt);
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(PollError::Timeout {
                    waited: now - start,
                });
            }
            delay = delay.min(deadline - now);
        }

        trace!(attempt, ?delay, "not ready yet");
        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ready_on(calls: &Arc<AtomicU32>, n: u32) -> impl FnMut() -> std::future::Ready<Result<Option<u32>, String>> {
        let calls = calls.clone();
        move || {
            let current = calls.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(Ok((current >= n).then_some(current)))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ready_immediately_does_not_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let value = poll_until(
            &PollPolicy::fixed(Duration::from_secs(1)),
            &CancellationToken::new(),
            ready_on(&calls, 1),
        )
        .await
        .unwrap();
        assert_eq!(value, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_interval_between_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let value = poll_until(
            &PollPolicy::fixed(Duration::from_secs(1)),
            &CancellationToken::new(),
            ready_on(&calls, 3),
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::fixed(Duration::from_secs(1)).with_max_wait(Duration::from_secs(5));
        let err = poll_until(&policy, &CancellationToken::new(), ready_on(&calls, u32::MAX))
            .await
            .unwrap_err();
        match err {
            PollError::Timeout { waited } => assert_eq!(waited, Duration::from_secs(5)),
            other => panic!("unexpected: {other:?}"),
        }
        // Checks at t = 0, 1, 2, 3, 4, 5.
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_shortens_last_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::fixed(Duration::from_secs(2)).with_max_wait(Duration::from_secs(3));
        let start = Instant::now();
        let err = poll_until(&policy, &CancellationToken::new(), ready_on(&calls, u32::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Timeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        // Checks at t = 0, 2, 3.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = poll_until(
            &PollPolicy::fixed(Duration::from_secs(1)),
            &cancel,
            ready_on(&calls, u32::MAX),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Cancelled));
        assert_eq!(start.elapsed(), Duration::from_millis(2500));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_never_checks() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poll_until(
            &PollPolicy::fixed(Duration::from_secs(1)),
            &cancel,
            ready_on(&calls, 1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PollError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn check_failure_propagates() {
        let err = poll_until::<u32, _, _, _>(
            &PollPolicy::fixed(Duration::from_secs(1)),
            &CancellationToken::new(),
            || std::future::ready(Err("status lookup failed".to_string())),
        )
        .await
        .unwrap_err();
        match err {
            PollError::Failed(msg) => assert_eq!(msg, "status lookup failed"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn zero_interval_is_raised_to_floor() {
        let policy = PollPolicy::fixed(Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), MIN_INTERVAL);
        assert_eq!(policy.delay_for_attempt(50), MIN_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_does_not_spin() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::fixed(Duration::ZERO).with_max_wait(Duration::from_millis(100));
        let start = Instant::now();
        let err = poll_until(&policy, &CancellationToken::new(), ready_on(&calls, u32::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, PollError::Timeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_millis(100));
        // Checks at t = 0, 10, 20, ... 100 ms.
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = PollPolicy::fixed(Duration::from_secs(1))
            .with_backoff(2.0, Duration::from_secs(5));
        let delays: Vec<u64> = (1..=5)
            .map(|a| policy.delay_for_attempt(a).as_secs())
            .collect();
        assert_eq!(delays, [1, 2, 4, 5, 5]);
    }

    #[test]
    fn from_settings() {
        let settings = PollSettings {
            interval_ms: 250,
            max_wait_ms: None,
            backoff_factor: 1.5,
            max_interval_ms: 2_000,
        };
        let policy = PollPolicy::from(&settings);
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_wait, None);
        assert_eq!(policy.max_interval, Duration::from_secs(2));
        assert_eq!(PollPolicy::default().interval, Duration::from_secs(1));
    }
}
