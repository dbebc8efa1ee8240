//! Resilience: circuit breaker + bounded retry around one external call
//!
//! What this module provides
//! - A failure-isolation primitive reused by every model call in the pipeline
//!
//! Exports
//! - Models
//!   - `CallOutcome::{Success, TransientFailure, PermanentFailure}`
//!   - `BreakerConfig { failure_threshold, cooldown }`, `RetryConfig` (see `config`)
//! - Components
//!   - `CircuitBreaker` (shared, synchronized state machine)
//!   - `RetryPolicy` with `Backoff` and an `ErrorClassifier`
//!   - `ResilientCall::execute(op)` composing the two
//! - Layers
//!   - `ResilienceLayer` wrapping any `Service<Req, Error = ModelError>`
//!
//! Implementation strategy
//! - The breaker is consulted once per logical call, not per retry attempt, so a
//!   call that exhausts its retries counts as a single failure
//! - Only `ResilientCall` records outcomes on the breaker
//! - Cancellation never counts as a failure; an abandoned probe is handed back
//!
//! Testing strategy
//! - Scripted fake operations (E E S) with call counters under paused time
//! - Concurrent callers at cooldown expiry to check the single-probe rule

pub mod breaker;
pub mod retry;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

pub use breaker::{Admission, BreakerStatus, CircuitBreaker, CircuitBreakerState, ProbeGuard};
pub use retry::{Backoff, BackoffKind, ErrorClassifier, RetryPolicy, TransientOnly};

use crate::error::{CallError, ModelError};

/// Result of one resilient call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    Success(T),
    TransientFailure(CallError),
    PermanentFailure(CallError),
}

impl<T> CallOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }

    pub fn into_result(self) -> Result<T, CallError> {
        match self {
            CallOutcome::Success(v) => Ok(v),
            CallOutcome::TransientFailure(e) | CallOutcome::PermanentFailure(e) => Err(e),
        }
    }
}

/// Breaker + retry policy around a single external operation.
#[derive(Debug, Clone)]
pub struct ResilientCall {
    breaker: CircuitBreaker,
    retry: RetryPolicy,
}

impl ResilientCall {
    pub fn new(breaker: CircuitBreaker, retry: RetryPolicy) -> Self {
        Self { breaker, retry }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Gate `op` on the breaker, run it through the retry policy and record the
    /// final outcome. A rejected call returns `PermanentFailure(CircuitOpen)`
    /// without invoking `op`.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        attempt_timeout: Option<Duration>,
        op: F,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let admission = self.breaker.admit();
        if let Admission::Rejected { retry_after } = admission {
            debug!(breaker = %self.breaker.name(), ?retry_after, "call rejected by open circuit");
            return CallOutcome::PermanentFailure(CallError::CircuitOpen { retry_after });
        }

        // Handed back on drop unless settled, including when this future is abandoned.
        let probe = (admission == Admission::Probe).then(|| ProbeGuard::new(&self.breaker));

        let outcome = self.retry.run(cancel, attempt_timeout, op).await;
        let recorded = match &outcome {
            CallOutcome::Success(_) => {
                self.breaker.record_success();
                true
            }
            CallOutcome::TransientFailure(CallError::Dependency(_))
            | CallOutcome::PermanentFailure(CallError::Dependency(_)) => {
                self.breaker.record_failure();
                true
            }
            _ => false,
        };
        if let (Some(probe), true) = (probe, recorded) {
            probe.settle();
        }
        outcome
    }
}

// ===== Layer =====

/// Applies a [`ResilientCall`] to every request of the wrapped service.
#[derive(Debug, Clone)]
pub struct ResilienceLayer {
    call: ResilientCall,
    cancel: CancellationToken,
    attempt_timeout: Option<Duration>,
}

impl ResilienceLayer {
    pub fn new(call: ResilientCall) -> Self {
        Self {
            call,
            cancel: CancellationToken::new(),
            attempt_timeout: None,
        }
    }

    /// Abort in-flight calls of every wrapped service when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Resilient<S> {
    inner: S,
    call: ResilientCall,
    cancel: CancellationToken,
    attempt_timeout: Option<Duration>,
}

impl<S> Layer<S> for ResilienceLayer {
    type Service = Resilient<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Resilient {
            inner,
            call: self.call.clone(),
            cancel: self.cancel.clone(),
            attempt_timeout: self.attempt_timeout,
        }
    }
}

impl<S, Req> Service<Req> for Resilient<S>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = ModelError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let call = self.call.clone();
        let cancel = self.cancel.clone();
        let attempt_timeout = self.attempt_timeout;
        let inner = self.inner.clone();
        Box::pin(async move {
            call.execute(&cancel, attempt_timeout, move || {
                let mut svc = inner.clone();
                let req = req.clone();
                async move { svc.ready().await?.call(req).await }
            })
            .await
            .into_result()
        })
    }
}
