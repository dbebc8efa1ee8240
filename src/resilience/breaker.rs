//! Circuit breaker shared by concurrent calls to one dependency.
//!
//! ```text
//! Closed   --failures >= threshold-->  Open
//! Open     --cooldown elapsed, next admit-->  HalfOpen (one probe)
//! HalfOpen --probe ok-->  Closed
//! HalfOpen --probe failed-->  Open (cooldown restarts)
//! ```
//!
//! All transitions happen under one mutex held only for synchronous
//! check-then-act sections, so at most one caller is granted the probe.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

/// Read-only view of a breaker at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerState {
    pub status: BreakerStatus,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    #[serde(skip)]
    pub opened_at: Option<Instant>,
    /// Wall-clock time of the last trip, for reporting
    #[serde(rename = "opened_at")]
    pub opened_at_utc: Option<DateTime<Utc>>,
    pub cooldown: Duration,
    /// Time left before a probe is admitted; `None` unless open
    pub retry_after: Option<Duration>,
}

/// Decision for one incoming call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed, call passes
    Allowed,
    /// Cooldown elapsed; this caller is the single half-open probe
    Probe,
    /// Breaker open or a probe is already in flight
    Rejected { retry_after: Duration },
}

#[derive(Debug)]
struct Inner {
    status: BreakerStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
}

/// Clonable handle; clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: BreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, mut config: BreakerConfig) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(Inner {
                status: BreakerStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                opened_at_utc: None,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Whether two handles share the same state.
    pub fn same_as(&self, other: &CircuitBreaker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consult the breaker before a call; may transition Open to HalfOpen.
    pub fn admit(&self) -> Admission {
        let mut s = self.lock();
        match s.status {
            BreakerStatus::Closed => Admission::Allowed,
            BreakerStatus::HalfOpen => Admission::Rejected {
                retry_after: Duration::ZERO,
            },
            BreakerStatus::Open => {
                let elapsed = s.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.config.cooldown {
                    s.status = BreakerStatus::HalfOpen;
                    info!(breaker = %self.name, "circuit half-open, admitting probe");
                    Admission::Probe
                } else {
                    Admission::Rejected {
                        retry_after: self.config.cooldown - elapsed,
                    }
                }
            }
        }
    }

    pub fn allow(&self) -> bool {
        !matches!(self.admit(), Admission::Rejected { .. })
    }

    pub fn record_success(&self) {
        let mut s = self.lock();
        if s.status != BreakerStatus::Closed || s.consecutive_failures > 0 {
            info!(
                breaker = %self.name,
                previous_failures = s.consecutive_failures,
                was = ?s.status,
                "dependency recovered"
            );
        }
        s.status = BreakerStatus::Closed;
        s.consecutive_failures = 0;
        s.opened_at = None;
        s.opened_at_utc = None;
    }

    pub fn record_failure(&self) {
        let mut s = self.lock();
        s.consecutive_failures = s.consecutive_failures.saturating_add(1);
        match s.status {
            BreakerStatus::Closed => {
                if s.consecutive_failures >= self.config.failure_threshold {
                    Self::trip(&mut s);
                    warn!(
                        breaker = %self.name,
                        failures = s.consecutive_failures,
                        threshold = self.config.failure_threshold,
                        "circuit opened"
                    );
                }
            }
            BreakerStatus::HalfOpen => {
                Self::trip(&mut s);
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            // A call admitted before the trip finished late; the clock keeps running.
            BreakerStatus::Open => {}
        }
    }

    /// Give back an abandoned probe without counting it as a failure. The
    /// breaker returns to Open with its cooldown already elapsed, so the next
    /// caller becomes the probe.
    pub fn release_probe(&self) {
        let mut s = self.lock();
        if s.status == BreakerStatus::HalfOpen {
            s.status = BreakerStatus::Open;
            info!(breaker = %self.name, "probe abandoned");
        }
    }

    /// Operator override: force Closed and forget failures.
    pub fn reset(&self) {
        let mut s = self.lock();
        s.status = BreakerStatus::Closed;
        s.consecutive_failures = 0;
        s.opened_at = None;
        s.opened_at_utc = None;
        info!(breaker = %self.name, "circuit manually reset");
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let s = self.lock();
        let retry_after = match (s.status, s.opened_at) {
            (BreakerStatus::Open, Some(t)) => Some(self.config.cooldown.saturating_sub(t.elapsed())),
            _ => None,
        };
        CircuitBreakerState {
            status: s.status,
            consecutive_failures: s.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            opened_at: s.opened_at,
            opened_at_utc: s.opened_at_utc,
            cooldown: self.config.cooldown,
            retry_after,
        }
    }

    fn trip(s: &mut Inner) {
        s.status = BreakerStatus::Open;
        s.opened_at = Some(Instant::now());
        s.opened_at_utc = Some(Utc::now());
    }
}

/// Ownership of the half-open probe slot.
///
/// Dropping an unsettled guard hands the probe back via
/// [`CircuitBreaker::release_probe`].
#[derive(Debug)]
pub struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl<'a> ProbeGuard<'a> {
    pub fn new(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            settled: false,
        }
    }

    /// The probe's outcome has been recorded; nothing to release.
    pub fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_probe();
        }
    }
}
