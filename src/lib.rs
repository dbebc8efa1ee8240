//! # tower-listing
//!
//! Turns a product photo into an e-commerce listing (title, description and
//! exactly five tags) with two calls to a vision model: a classification gate,
//! then listing generation. Both calls run behind a circuit breaker and a
//! bounded retry policy built as Tower-style components.
//!
//! ## Core Concepts
//!
//! - **Model**: any `Service<ModelCall, Response = RawReply, Error = ModelError>`
//! - **Resilience**: `CircuitBreaker` + `RetryPolicy` composed by `ResilientCall`
//! - **Pipeline**: classify, then generate; "not a product" is an outcome, not a failure
//! - **Orchestrator**: the only type callers need; maps everything onto `AnalysisError`
//!
//! ## Getting Started
//!
//! Set `OPENAI_API_KEY` (and `OPENAI_BASE_URL` for another compatible endpoint).
//!
//! ```rust,no_run
//! use tower_listing::{config, InferenceRequest, ListingOrchestrator, OpenAiVisionClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let model = OpenAiVisionClient::new("gpt-4o-mini");
//! let orchestrator = ListingOrchestrator::new(model, config::from_env());
//!
//! let image = std::fs::read("mug.jpg")?;
//! match orchestrator.analyze(InferenceRequest::new(image, "English")).await {
//!     Ok(listing) => println!("{}: {:?}", listing.title, listing.tags),
//!     Err(e) => eprintln!("{}: {}", e.kind(), e.reason()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod request;
pub mod resilience;

// Public re-exports for convenience
pub use config::{
    BreakerConfig, BreakerScope, ClassificationPolicy, ConfigBuilder, OrchestratorConfig,
    ReplyPolicy, RetryConfig,
};
pub use error::{AnalysisError, CallError, ErrorKind, ModelError, Result};
pub use orchestrator::{BreakerReport, HealthReport, HealthStatus, ListingOrchestrator};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use provider::{MockModel, ModelCall, OpenAiVisionClient, RawReply};
pub use request::{ClassificationVerdict, InferenceRequest, ListingResult, PromptKind, TAG_COUNT};
pub use resilience::{
    BreakerStatus, CallOutcome, CircuitBreaker, CircuitBreakerState, ResilienceLayer,
    ResilientCall, RetryPolicy,
};

pub use tokio_util::sync::CancellationToken;

// Re-export Tower traits that users need
pub use tower::{Layer, Service, ServiceExt};
