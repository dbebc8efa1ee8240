//! Configuration for the orchestrator and its resilience layers
//!
//! Durations are serialized as integer milliseconds (`*_ms` keys) so TOML
//! files stay readable.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default upper bound on accepted image payloads (10 MiB).
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: usize,

    /// Delay before the second attempt
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f32,

    /// Upper bound for any single delay
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,

    /// Add up to 30% random jitter to each delay
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,

    /// Time the breaker stays open before admitting a probe
    #[serde(rename = "cooldown_ms", with = "millis")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Whether the two pipeline stages share one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One breaker per stage, same configuration
    #[default]
    Independent,
    /// Both stages feed one breaker. Any success resets the streak, so a
    /// successful classification clears failures recorded by generation and a
    /// generation stage that always fails will not trip it on its own.
    Shared,
}

/// What to do when the classification reply cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPolicy {
    /// Treat the image as a product and continue
    #[default]
    FailOpen,
    /// Stop with a malformed-reply error
    FailClosed,
}

/// How strictly generation replies are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyPolicy {
    /// Pad short tag lists and fall back to a listing built from raw text
    #[default]
    Lenient,
    /// Reject incomplete or unparseable replies
    Strict,
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub breaker_scope: BreakerScope,
    pub classification_policy: ClassificationPolicy,
    pub reply_policy: ReplyPolicy,

    /// Deadline for each external attempt. Defaults to `None` (unbounded);
    /// callers set one here, per request, or via `LISTING_ATTEMPT_TIMEOUT_SECS`.
    #[serde(rename = "attempt_timeout_ms", with = "millis_opt")]
    pub attempt_timeout: Option<Duration>,

    pub max_image_bytes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            breaker_scope: BreakerScope::default(),
            classification_policy: ClassificationPolicy::default(),
            reply_policy: ReplyPolicy::default(),
            attempt_timeout: None,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }
}

/// Configuration builder
pub struct ConfigBuilder {
    config: OrchestratorConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::default(),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, initial: Duration, multiplier: f32, max: Duration) -> Self {
        self.config.retry.initial_delay = initial;
        self.config.retry.backoff_multiplier = multiplier;
        self.config.retry.max_delay = max;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.retry.jitter = enabled;
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.breaker.failure_threshold = threshold;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.breaker.cooldown = cooldown;
        self
    }

    pub fn breaker_scope(mut self, scope: BreakerScope) -> Self {
        self.config.breaker_scope = scope;
        self
    }

    pub fn classification_policy(mut self, policy: ClassificationPolicy) -> Self {
        self.config.classification_policy = policy;
        self
    }

    pub fn reply_policy(mut self, policy: ReplyPolicy) -> Self {
        self.config.reply_policy = policy;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.attempt_timeout = timeout;
        self
    }

    pub fn max_image_bytes(mut self, bytes: usize) -> Self {
        self.config.max_image_bytes = bytes;
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

/// Load configuration from environment variables
pub fn from_env() -> OrchestratorConfig {
    from_lookup(|key| std::env::var(key).ok())
}

/// Load configuration from any key lookup; unset keys keep their defaults.
pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();

    if let Some(v) = parse_var(&lookup, "LISTING_MAX_ATTEMPTS") {
        config.retry.max_attempts = v;
    }
    if let Some(v) = parse_var(&lookup, "LISTING_BREAKER_THRESHOLD") {
        config.breaker.failure_threshold = v;
    }
    if let Some(v) = parse_var::<u64>(&lookup, "LISTING_BREAKER_COOLDOWN_SECS") {
        config.breaker.cooldown = Duration::from_secs(v);
    }
    if let Some(v) = parse_var::<u64>(&lookup, "LISTING_ATTEMPT_TIMEOUT_SECS") {
        config.attempt_timeout = (v > 0).then(|| Duration::from_secs(v));
    }
    if let Some(v) = parse_var(&lookup, "LISTING_MAX_IMAGE_BYTES") {
        config.max_image_bytes = v;
    }

    config
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}

/// Load configuration from a TOML file
pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<OrchestratorConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }
}
