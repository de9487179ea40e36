use crate::backoff::BackoffPolicy;
use crate::classify::{classify, ErrorKind};
use log::{info, warn};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Emitted right before the invoker sleeps out a throttled attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    pub slide_index: usize,
    pub wait_seconds: u64,
    /// 1-based number of the attempt that just failed.
    pub attempt: usize,
    pub max_attempts: usize,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("slide {index}: {cause:#}")]
    Fatal { index: usize, cause: anyhow::Error },

    #[error("slide {index}: still rate limited after {attempts} attempts: {last:#}")]
    RetryExhausted {
        index: usize,
        attempts: usize,
        last: anyhow::Error,
    },

    #[error("slide {index}: cancelled")]
    Cancelled { index: usize },
}

impl InvokeError {
    pub fn index(&self) -> usize {
        match self {
            InvokeError::Fatal { index, .. }
            | InvokeError::RetryExhausted { index, .. }
            | InvokeError::Cancelled { index } => *index,
        }
    }
}

/// Shared stop switch. Checked between attempts and between items, never mid-sleep.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call loop state; lives for one `invoke` and is never shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    pub attempt: usize,
    pub max_attempts: usize,
    pub last_error_kind: Option<ErrorKind>,
}

impl RetryState {
    fn new(max_attempts: usize) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error_kind: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryingInvoker {
    policy: BackoffPolicy,
    max_attempts: usize,
    cancel: CancelFlag,
}

impl RetryingInvoker {
    pub fn new(policy: BackoffPolicy, max_attempts: usize) -> Self {
        Self {
            policy,
            max_attempts: max_attempts.max(1),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Runs `call` until it succeeds, fails fatally, or uses up `max_attempts` calls.
    ///
    /// Between retryable failures the task sleeps for the backoff wait; `on_wait`
    /// is told about each wait before it starts. Attempts are strictly sequential.
    pub async fn invoke<T, F, Fut, W>(
        &self,
        index: usize,
        mut call: F,
        mut on_wait: W,
    ) -> Result<T, InvokeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        W: FnMut(ProgressEvent),
    {
        let mut state = RetryState::new(self.max_attempts);

        loop {
            if self.cancel.is_cancelled() {
                return Err(InvokeError::Cancelled { index });
            }

            let err = match call().await {
                Ok(value) => {
                    if state.attempt > 0 {
                        info!("Slide {} succeeded after {} retries", index, state.attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind = classify(&err);
            state.last_error_kind = Some(kind);
            if kind == ErrorKind::Fatal {
                warn!("Slide {} failed with a non-retryable error: {:#}", index, err);
                return Err(InvokeError::Fatal { index, cause: err });
            }

            state.attempt += 1;
            if state.attempt >= state.max_attempts {
                warn!(
                    "Slide {} still throttled after {} attempts: {:#}",
                    index, state.attempt, err
                );
                return Err(InvokeError::RetryExhausted {
                    index,
                    attempts: state.attempt,
                    last: err,
                });
            }

            let wait = self.policy.next_wait(state.attempt - 1);
            warn!(
                "Slide {} throttled (attempt {}/{}), waiting {}s: {:#}",
                index, state.attempt, state.max_attempts, wait, err
            );
            on_wait(ProgressEvent {
                slide_index: index,
                wait_seconds: wait,
                attempt: state.attempt,
                max_attempts: state.max_attempts,
            });
            sleep(Duration::from_secs(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    /// Fails with `message` for the first `failures` calls, then returns the call number.
    fn scripted(
        calls: Arc<AtomicUsize>,
        failures: usize,
        message: &'static str,
    ) -> impl FnMut() -> std::pin::Pin<Box<dyn Future<Output = anyhow::Result<usize>> + Send>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures {
                    Err(anyhow!(message))
                } else {
                    Ok(n)
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_try_success_has_no_waits() {
        let invoker = RetryingInvoker::new(BackoffPolicy::new(5, 0), 3);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = Vec::new();

        let value = invoker
            .invoke(1, scripted(calls.clone(), 0, "429"), |e| events.push(e))
            .await
            .unwrap();

        assert_eq!(value, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_k_retryable_failures_then_success() {
        let invoker = RetryingInvoker::new(BackoffPolicy::new(5, 0), 5);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = Vec::new();
        let start = Instant::now();

        let value = invoker
            .invoke(2, scripted(calls.clone(), 3, "429 Too Many Requests"), |e| {
                events.push(e)
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let waits: Vec<u64> = events.iter().map(|e| e.wait_seconds).collect();
        assert_eq!(waits, vec![5, 10, 15]);
        assert_eq!(
            events.iter().map(|e| e.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(events.iter().all(|e| e.slide_index == 2 && e.max_attempts == 5));
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_makes_max_attempts_calls() {
        let invoker = RetryingInvoker::new(BackoffPolicy::new(5, 2), 3);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = Vec::new();

        let err = invoker
            .invoke(4, scripted(calls.clone(), 10, "quota exceeded"), |e| events.push(e))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            InvokeError::RetryExhausted { index: 4, attempts: 3, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(events.len(), 2);
        assert!(events[0].wait_seconds < events[1].wait_seconds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_stops_immediately() {
        let invoker = RetryingInvoker::new(BackoffPolicy::new(5, 0), 5);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = Vec::new();
        let start = Instant::now();

        let err = invoker
            .invoke(1, scripted(calls.clone(), 10, "unsupported content type"), |e| {
                events.push(e)
            })
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Fatal { index: 1, .. }));
        assert!(err.to_string().contains("unsupported content type"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_after_retryable_keeps_earlier_waits() {
        let invoker = RetryingInvoker::new(BackoffPolicy::new(5, 0), 5);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = Vec::new();
        let c = calls.clone();

        let err = invoker
            .invoke(
                7,
                move || {
                    let n = c.fetch_add(1, Ordering::SeqCst);
                    async move {
                        match n {
                            0 => Err(anyhow!("503 Service Unavailable")),
                            _ => Err::<(), _>(anyhow!("API key not valid")),
                        }
                    }
                },
                |e| events.push(e),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Fatal { index: 7, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_budget_never_waits() {
        let invoker = RetryingInvoker::new(BackoffPolicy::default(), 1);
        let calls = Arc::new(AtomicUsize::new(0));
        let mut events = Vec::new();

        let err = invoker
            .invoke(1, scripted(calls.clone(), 1, "429"), |e| events.push(e))
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::RetryExhausted { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let invoker = RetryingInvoker::new(BackoffPolicy::default(), 3).with_cancel(cancel);
        let calls = Arc::new(AtomicUsize::new(0));

        let err = invoker
            .invoke(5, scripted(calls.clone(), 0, "429"), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Cancelled { index: 5 }));
        assert_eq!(err.index(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_stops_before_next_attempt() {
        let invoker = RetryingInvoker::new(BackoffPolicy::new(5, 0), 5);
        let cancel = invoker.cancel_flag().clone();
        let calls = Arc::new(AtomicUsize::new(0));

        let err = invoker
            .invoke(3, scripted(calls.clone(), 10, "429"), |_| cancel.cancel())
            .await
            .unwrap_err();

        assert!(matches!(err, InvokeError::Cancelled { index: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
