//! Two-step inference pipeline: classify, then generate
//!
//! What this module provides
//! - The business sequencing around two resilient model calls. Classification
//!   gates generation; "not a product" is an ordinary outcome, not an error.
//!
//! Exports
//! - `Pipeline<S>` where `S: Service<ModelCall, Response = RawReply, Error = ModelError>`
//! - `PipelineOutcome::{Listed, NotAProduct, Failed, Unparseable}`
//!
//! Implementation strategy
//! - Each stage runs through its own `ResilientCall`; whether the two share a
//!   breaker is decided by whoever builds the pipeline
//! - Replies are parsed outside the resilient call: a reply that arrived is
//!   evidence the dependency is healthy, whatever its content
//! - Unparseable classification replies follow `ClassificationPolicy`;
//!   generation replies follow `ReplyPolicy`

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::codec::{self, CodecError};
use crate::config::{ClassificationPolicy, ReplyPolicy};
use crate::error::{CallError, ModelError};
use crate::provider::{ModelCall, RawReply};
use crate::request::{ClassificationVerdict, InferenceRequest, ListingResult, PromptKind};
use crate::resilience::{CallOutcome, ResilientCall};

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Both stages succeeded
    Listed(ListingResult),
    /// Classification rejected the image; generation was not attempted
    NotAProduct(ClassificationVerdict),
    /// A stage's resilient call failed
    Failed {
        stage: PromptKind,
        error: CallError,
        transient: bool,
    },
    /// A stage's reply could not be interpreted under the configured policy
    Unparseable { stage: PromptKind, message: String },
}

/// Result of the classification step: either proceed with a verdict or stop.
enum Gate {
    Proceed(ClassificationVerdict),
    Stop(PipelineOutcome),
}

#[derive(Debug, Clone)]
pub struct Pipeline<S> {
    model: S,
    classify: ResilientCall,
    generate: ResilientCall,
    classification_policy: ClassificationPolicy,
    reply_policy: ReplyPolicy,
    attempt_timeout: Option<Duration>,
}

impl<S> Pipeline<S> {
    pub fn new(model: S, classify: ResilientCall, generate: ResilientCall) -> Self {
        Self {
            model,
            classify,
            generate,
            classification_policy: ClassificationPolicy::default(),
            reply_policy: ReplyPolicy::default(),
            attempt_timeout: None,
        }
    }

    /// Per-attempt deadline used when the request does not set one.
    pub fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_classification_policy(mut self, policy: ClassificationPolicy) -> Self {
        self.classification_policy = policy;
        self
    }

    pub fn with_reply_policy(mut self, policy: ReplyPolicy) -> Self {
        self.reply_policy = policy;
        self
    }

    pub fn stage(&self, stage: PromptKind) -> &ResilientCall {
        match stage {
            PromptKind::Classify => &self.classify,
            PromptKind::Generate => &self.generate,
        }
    }
}

impl<S> Pipeline<S>
where
    S: Service<ModelCall, Response = RawReply, Error = ModelError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    pub async fn run(&self, request: &InferenceRequest, cancel: &CancellationToken) -> PipelineOutcome {
        let verdict = match self.classify_step(request, cancel).await {
            Gate::Proceed(verdict) => verdict,
            Gate::Stop(outcome) => return outcome,
        };
        debug!(category = ?verdict.category, confidence = ?verdict.confidence, "classified as product");
        self.generate_step(request, cancel).await
    }

    async fn classify_step(&self, request: &InferenceRequest, cancel: &CancellationToken) -> Gate {
        let reply = match self.invoke(PromptKind::Classify, request, cancel).await {
            Ok(reply) => reply,
            Err(outcome) => return Gate::Stop(outcome),
        };
        let verdict = match codec::parse_verdict(&reply.text) {
            Ok(verdict) => verdict,
            Err(e) => match self.classification_policy {
                ClassificationPolicy::FailOpen => {
                    warn!(error = %e, "unparseable classification reply, proceeding");
                    ClassificationVerdict::fail_open(format!("classification unavailable: {e}"))
                }
                ClassificationPolicy::FailClosed => {
                    warn!(error = %e, "unparseable classification reply, rejecting");
                    return Gate::Stop(PipelineOutcome::Unparseable {
                        stage: PromptKind::Classify,
                        message: e.to_string(),
                    });
                }
            },
        };
        if verdict.is_product {
            Gate::Proceed(verdict)
        } else {
            info!(category = ?verdict.category, reason = %verdict.reason, "image is not a product");
            Gate::Stop(PipelineOutcome::NotAProduct(verdict))
        }
    }

    async fn generate_step(&self, request: &InferenceRequest, cancel: &CancellationToken) -> PipelineOutcome {
        let reply = match self.invoke(PromptKind::Generate, request, cancel).await {
            Ok(reply) => reply,
            Err(outcome) => return outcome,
        };
        let language = request.language();
        let parsed = codec::parse_listing(&reply.text)
            .and_then(|raw| codec::normalize_listing(raw, language, self.reply_policy));
        match (parsed, self.reply_policy) {
            (Ok(listing), _) => PipelineOutcome::Listed(listing),
            (Err(e @ CodecError::Json(_)), ReplyPolicy::Lenient) => {
                warn!(error = %e, "unparseable generation reply, using fallback listing");
                PipelineOutcome::Listed(codec::fallback_listing(&reply.text, language))
            }
            (Err(e), _) => PipelineOutcome::Unparseable {
                stage: PromptKind::Generate,
                message: e.to_string(),
            },
        }
    }

    async fn invoke(
        &self,
        stage: PromptKind,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> Result<RawReply, PipelineOutcome> {
        let span = info_span!("stage", %stage);
        let outcome = self
            .stage(stage)
            .execute(cancel, request.attempt_timeout().or(self.attempt_timeout), || {
                let mut model = self.model.clone();
                let call = ModelCall {
                    kind: stage,
                    image: request.image().clone(),
                    language: request.language().to_string(),
                };
                async move { model.ready().await?.call(call).await }
            })
            .instrument(span)
            .await;

        match outcome {
            CallOutcome::Success(reply) => Ok(reply),
            CallOutcome::TransientFailure(error) => Err(PipelineOutcome::Failed {
                stage,
                error,
                transient: true,
            }),
            CallOutcome::PermanentFailure(error) => Err(PipelineOutcome::Failed {
                stage,
                error,
                transient: false,
            }),
        }
    }
}
