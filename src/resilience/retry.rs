//! Bounded retry with exponential backoff

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::CallOutcome;
use crate::config::RetryConfig;
use crate::error::{CallError, ModelError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub initial: Duration,
    pub factor: f32,
    pub max: Duration,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            initial: delay,
            factor: 1.0,
            max: delay,
        }
    }

    pub fn exponential(initial: Duration, factor: f32, max: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            initial,
            factor,
            max,
        }
    }

    /// Delay after the `attempt`-th failure (1-based):
    /// `min(initial * factor^(attempt-1), max)`.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.initial,
            BackoffKind::Exponential => {
                let exp = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
                let mult = self.factor.powi(exp);
                if !mult.is_finite() {
                    return self.max;
                }
                let nanos = (self.initial.as_nanos() as f64 * mult as f64).round();
                if nanos >= self.max.as_nanos() as f64 {
                    self.max
                } else {
                    Duration::from_nanos(nanos as u64)
                }
            }
        }
    }
}

/// Decides whether a dependency failure is worth another attempt.
pub trait ErrorClassifier: Send + Sync + 'static {
    fn is_retryable(&self, error: &ModelError) -> bool;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&ModelError) -> bool + Send + Sync + 'static,
{
    fn is_retryable(&self, error: &ModelError) -> bool {
        self(error)
    }
}

/// Retries timeouts, rate limits and unavailability; nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientOnly;

impl ErrorClassifier for TransientOnly {
    fn is_retryable(&self, error: &ModelError) -> bool {
        error.is_transient()
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: bool,
    classifier: Arc<dyn ErrorClassifier>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: Backoff::exponential(
                config.initial_delay,
                config.backoff_multiplier,
                config.max_delay,
            ),
            jitter: config.jitter,
            classifier: Arc::new(TransientOnly),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_classifier(mut self, classifier: impl ErrorClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    fn delay_after(&self, attempt: usize) -> Duration {
        let delay = self.backoff.delay_after(attempt);
        if !self.jitter {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..0.3);
        (delay + delay.mul_f64(jitter)).min(self.backoff.max)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `attempt_timeout` when given; an elapsed
    /// attempt counts as [`ModelError::Timeout`]. Cancellation interrupts both
    /// attempts and backoff waits and yields `PermanentFailure(Cancelled)`.
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        attempt_timeout: Option<Duration>,
        mut op: F,
    ) -> CallOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CallOutcome::PermanentFailure(CallError::Cancelled),
                r = bounded(op(), attempt_timeout) => r,
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return CallOutcome::Success(value);
                }
                Err(error) => error,
            };

            if !self.classifier.is_retryable(&error) {
                debug!(attempt, %error, "non-retryable failure");
                return CallOutcome::PermanentFailure(error.into());
            }
            if attempt >= self.max_attempts {
                warn!(attempts = attempt, %error, "retries exhausted");
                return CallOutcome::TransientFailure(error.into());
            }

            let delay = self.delay_after(attempt);
            warn!(attempt, %error, ?delay, "attempt failed, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return CallOutcome::PermanentFailure(CallError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

async fn bounded<Fut, T>(fut: Fut, limit: Option<Duration>) -> Result<T, ModelError>
where
    Fut: Future<Output = Result<T, ModelError>>,
{
    match limit {
        Some(limit) => match timeout(limit, fut).await {
            Ok(r) => r,
            Err(_) => Err(ModelError::Timeout(format!("no reply within {limit:?}"))),
        },
        None => fut.await,
    }
}
