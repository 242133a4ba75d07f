//! Rate-Limit (FloodWait) Handler. Wraps every remote call.
//!
//! Defaults: `max_retries=3`, `base_delay=0.5s`, a twenty-segment progress
//! split for waits over ten seconds, and a "non-wait errors propagate
//! unchanged, cancellation propagates" contract. Callers pass their remote
//! call as a closure to `FloodWaitHandler::call` so wrapping happens
//! explicitly at each call site.

use crate::domain::{CancelToken, DomainError};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

const TICKS: u32 = 20;

#[derive(Debug, Clone, Copy)]
pub struct FloodWaitHandler {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for FloodWaitHandler {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl FloodWaitHandler {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Runs `op`, retrying on `DomainError::WaitRequired` up to
    /// `max_retries` times. Any other error (including `Cancelled`) is
    /// returned immediately, unwrapped and unretried.
    pub async fn call<F, Fut, T>(&self, cancel: &CancelToken, mut op: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            match op().await {
                Ok(v) => return Ok(v),
                Err(DomainError::WaitRequired { seconds }) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(DomainError::WaitRequired { seconds });
                    }
                    let wait = Duration::from_secs(seconds) + self.base_delay;
                    warn!(attempt, wait_secs = wait.as_secs(), "flood wait, sleeping");
                    if self.wait_with_progress(cancel, wait).await.is_err() {
                        return Err(DomainError::Cancelled);
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Sleeps `wait` honouring `cancel`. Waits over ten seconds are split
    /// into twenty evenly-spaced ticks so callers can render progress;
    /// shorter waits sleep directly.
    async fn wait_with_progress(
        &self,
        cancel: &CancelToken,
        wait: Duration,
    ) -> Result<(), ()> {
        if wait <= Duration::from_secs(10) {
            return self.cancellable_sleep(cancel, wait).await;
        }
        let segment = wait / TICKS;
        for tick in 1..=TICKS {
            self.cancellable_sleep(cancel, segment).await?;
            let remaining = wait.saturating_sub(segment * tick);
            info!(
                percent = tick * 100 / TICKS,
                remaining_secs = remaining.as_secs(),
                "flood wait progress"
            );
        }
        Ok(())
    }

    async fn cancellable_sleep(&self, cancel: &CancelToken, dur: Duration) -> Result<(), ()> {
        const POLL: Duration = Duration::from_millis(200);
        let mut remaining = dur;
        while !remaining.is_zero() {
            if cancel.is_cancelled() {
                return Err(());
            }
            let step = remaining.min(POLL);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
        Ok(())
    }
}

/// Remote client methods that return lazy iterators/async streams. The
/// resolver/collector call these directly and wrap each yielded item
/// individually instead of handing the whole method to
/// `FloodWaitHandler::call`: wrapping the iterator itself would consume it
/// eagerly. Kept as a named constant so new call sites can check against
/// it rather than guessing.
pub const EXCLUDED_FROM_BLANKET_WRAPPING: &[&str] = &["get_chat_history", "iter_dialogs"];

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_on_wait_required_then_succeeds() {
        let handler = FloodWaitHandler::new(3, Duration::from_millis(1));
        let cancel = CancelToken::new();
        let attempts = AtomicU32::new(0);
        let result = handler
            .call(&cancel, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(DomainError::WaitRequired { seconds: 0 })
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_other_errors() {
        let handler = FloodWaitHandler::default();
        let cancel = CancelToken::new();
        let attempts = AtomicU32::new(0);
        let result: Result<(), DomainError> = handler
            .call(&cancel, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(DomainError::ForwardRestricted) }
            })
            .await;
        assert!(matches!(result, Err(DomainError::ForwardRestricted)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let handler = FloodWaitHandler::new(2, Duration::from_millis(1));
        let cancel = CancelToken::new();
        let result: Result<(), DomainError> = handler
            .call(&cancel, || async { Err(DomainError::WaitRequired { seconds: 0 }) })
            .await;
        assert!(matches!(result, Err(DomainError::WaitRequired { .. })));
    }
}
