//! Bounded, cancellable polling.
//!
//! Used where an external system makes state visible asynchronously (the
//! identity provider publishing a session after a code exchange). The wait
//! always ends: with a value, with the probe's error, at the deadline, or when
//! the cancellation token fires. Dropping the future stops polling as well.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitError<E> {
    TimedOut,
    Cancelled,
    Failed(E),
}

/// Call `probe` every `poll_interval` (first call immediately) until it yields
/// `Some`, fails, the timeout elapses or `cancel` fires.
pub async fn poll_until<T, E, F, Fut>(
    policy: WaitPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<T, WaitError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let polling = async {
        let mut interval = tokio::time::interval(policy.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => continue,
                Err(e) => return Err(WaitError::Failed(e)),
            }
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        outcome = tokio::time::timeout(policy.timeout, polling) => {
            outcome.unwrap_or(Err(WaitError::TimedOut))
        }
    }
}
