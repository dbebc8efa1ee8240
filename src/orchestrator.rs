//! Public entry point for listing analysis
//!
//! What this module provides
//! - `ListingOrchestrator<S>`: validates a request, drives the pipeline once and
//!   maps its tagged outcome onto `AnalysisError`
//! - Read-only breaker status and an administrative reset
//! - A serializable health report for the transport layer
//!
//! Exports
//! - `ListingOrchestrator::{new, analyze, analyze_with_cancel, breaker_status, reset_breaker, health}`
//! - `BreakerReport`, `HealthReport`, `HealthStatus`
//!
//! Implementation strategy
//! - The orchestrator owns only handles: the pipeline and the breaker(s) it was
//!   built with. Breaker state lives behind the breaker's own mutex
//! - With `BreakerScope::Shared` both stages hold clones of one breaker, so the
//!   report shows the same snapshot twice
//!
//! Testing strategy
//! - End-to-end scenarios over `MockModel` live in `tests/orchestrator_scenarios.rs`

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{BreakerScope, OrchestratorConfig};
use crate::error::{AnalysisError, CallError, ModelError, Result};
use crate::pipeline::{Pipeline, PipelineOutcome};
use crate::provider::{ModelCall, RawReply};
use crate::request::{InferenceRequest, ListingResult, PromptKind};
use crate::resilience::{
    BreakerStatus, CircuitBreaker, CircuitBreakerState, ResilientCall, RetryPolicy,
};

/// Breaker snapshots for both pipeline stages.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerReport {
    pub scope: BreakerScope,
    pub classify: CircuitBreakerState,
    pub generate: CircuitBreakerState,
}

impl BreakerReport {
    /// Least healthy of the two stage statuses.
    pub fn status(&self) -> BreakerStatus {
        fn rank(status: BreakerStatus) -> u8 {
            match status {
                BreakerStatus::Closed => 0,
                BreakerStatus::HalfOpen => 1,
                BreakerStatus::Open => 2,
            }
        }
        if rank(self.classify.status) >= rank(self.generate.status) {
            self.classify.status
        } else {
            self.generate.status
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub breakers: BreakerReport,
    pub retry: crate::config::RetryConfig,
    pub breaker: crate::config::BreakerConfig,
}

pub struct ListingOrchestrator<S> {
    pipeline: Pipeline<S>,
    config: OrchestratorConfig,
}

impl<S> ListingOrchestrator<S> {
    pub fn new(model: S, config: OrchestratorConfig) -> Self {
        let retry = RetryPolicy::new(&config.retry);
        let (classify, generate) = match config.breaker_scope {
            BreakerScope::Independent => (
                CircuitBreaker::new("classify", config.breaker.clone()),
                CircuitBreaker::new("generate", config.breaker.clone()),
            ),
            BreakerScope::Shared => {
                let shared = CircuitBreaker::new("model", config.breaker.clone());
                (shared.clone(), shared)
            }
        };
        let pipeline = Pipeline::new(
            model,
            ResilientCall::new(classify, retry.clone()),
            ResilientCall::new(generate, retry),
        )
        .with_classification_policy(config.classification_policy)
        .with_reply_policy(config.reply_policy)
        .with_attempt_timeout(config.attempt_timeout);
        Self { pipeline, config }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn breaker_status(&self) -> BreakerReport {
        BreakerReport {
            scope: self.config.breaker_scope,
            classify: self.pipeline.stage(PromptKind::Classify).breaker().snapshot(),
            generate: self.pipeline.stage(PromptKind::Generate).breaker().snapshot(),
        }
    }

    /// Force every breaker back to Closed.
    pub fn reset_breaker(&self) {
        let classify = self.pipeline.stage(PromptKind::Classify).breaker();
        let generate = self.pipeline.stage(PromptKind::Generate).breaker();
        classify.reset();
        if !generate.same_as(classify) {
            generate.reset();
        }
        info!("breakers reset by operator");
    }

    pub fn health(&self) -> HealthReport {
        let breakers = self.breaker_status();
        let status = match breakers.status() {
            BreakerStatus::Closed => HealthStatus::Healthy,
            BreakerStatus::Open | BreakerStatus::HalfOpen => HealthStatus::Degraded,
        };
        HealthReport {
            status,
            breakers,
            retry: self.config.retry.clone(),
            breaker: self.config.breaker.clone(),
        }
    }

    fn validate(&self, request: &InferenceRequest) -> Result<()> {
        let size = request.image().len();
        if size == 0 {
            return Err(invalid("image is empty"));
        }
        if size > self.config.max_image_bytes {
            return Err(invalid(format!(
                "image is {size} bytes, limit is {}",
                self.config.max_image_bytes
            )));
        }
        if request.language().trim().is_empty() {
            return Err(invalid("language must not be blank"));
        }
        Ok(())
    }
}

impl<S> ListingOrchestrator<S>
where
    S: Service<ModelCall, Response = RawReply, Error = ModelError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    pub async fn analyze(&self, request: InferenceRequest) -> Result<ListingResult> {
        self.analyze_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Like [`analyze`](Self::analyze), aborting promptly once `cancel` fires.
    pub async fn analyze_with_cancel(
        &self,
        request: InferenceRequest,
        cancel: &CancellationToken,
    ) -> Result<ListingResult> {
        let request = match request.trace_id() {
            Some(_) => request,
            None => request.with_trace_id(Uuid::new_v4().to_string()),
        };
        let span = info_span!(
            "analyze",
            trace_id = request.trace_id().unwrap_or_default(),
            language = request.language(),
            image_bytes = request.image().len(),
        );

        async {
            let result = match self.validate(&request) {
                Ok(()) => map_outcome(self.pipeline.run(&request, cancel).await),
                Err(e) => Err(e),
            };
            match &result {
                Ok(listing) => info!(title = %listing.title, "listing generated"),
                Err(e) => debug!(kind = %e.kind(), error = %e, "analysis failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

fn invalid(message: impl Into<String>) -> AnalysisError {
    AnalysisError::InvalidRequest {
        message: message.into(),
    }
}

fn map_outcome(outcome: PipelineOutcome) -> Result<ListingResult> {
    match outcome {
        PipelineOutcome::Listed(listing) => Ok(listing),
        PipelineOutcome::NotAProduct(verdict) => Err(AnalysisError::NotAProduct {
            reason: verdict.reason,
            category: verdict.category,
        }),
        PipelineOutcome::Failed {
            stage,
            error,
            transient,
        } => Err(match error {
            CallError::Dependency(source) if transient => {
                AnalysisError::TransientDependency { stage, source }
            }
            CallError::Dependency(source) => AnalysisError::PermanentDependency { stage, source },
            CallError::CircuitOpen { retry_after } => {
                AnalysisError::CircuitOpen { stage, retry_after }
            }
            CallError::Cancelled => AnalysisError::Cancelled,
        }),
        PipelineOutcome::Unparseable { stage, message } => {
            Err(AnalysisError::MalformedReply { stage, message })
        }
    }
}
