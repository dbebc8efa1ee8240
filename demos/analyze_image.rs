//! Analyze one image file against an OpenAI-compatible vision endpoint.
//!
//! ```text
//! OPENAI_API_KEY=... cargo run --example analyze_image -- photo.jpg Spanish
//! ```
//!
//! Optional: `LISTING_API_BASE` for another compatible endpoint, `LISTING_MODEL`
//! for the model name, and the `LISTING_*` resilience settings read by
//! `config::from_env`. Attempts time out after 30s unless
//! `LISTING_ATTEMPT_TIMEOUT_SECS` says otherwise.

use std::env;
use std::time::Duration;

use serde_json::json;
use tower_listing::{config, InferenceRequest, ListingOrchestrator, OpenAiVisionClient};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = env::args().skip(1);
    let path = args
        .next()
        .ok_or("usage: analyze_image <image-path> [language]")?;
    let language = args.next().unwrap_or_else(|| "English".to_string());

    let model_name = env::var("LISTING_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let model = match env::var("LISTING_API_BASE") {
        Ok(base) => OpenAiVisionClient::with_endpoint(base, env::var("OPENAI_API_KEY")?, model_name),
        Err(_) => OpenAiVisionClient::new(model_name),
    };

    let mut config = config::from_env();
    if config.attempt_timeout.is_none() {
        config.attempt_timeout = Some(Duration::from_secs(30));
    }
    let orchestrator = ListingOrchestrator::new(model, config);
    let image = std::fs::read(&path)?;

    let output = match orchestrator.analyze(InferenceRequest::new(image, language)).await {
        Ok(listing) => json!({ "success": true, "listing": listing }),
        Err(e) => json!({
            "success": false,
            "error": { "kind": e.kind(), "reason": e.reason(), "retryable": e.is_retryable() },
        }),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    println!("{}", serde_json::to_string_pretty(&orchestrator.health())?);
    Ok(())
}
