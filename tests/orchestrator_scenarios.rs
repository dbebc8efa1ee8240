//! End-to-end scenarios through `ListingOrchestrator` with a scripted model.
//!
//! All tests run on a paused clock so backoff and cooldown are deterministic.

use std::time::Duration;

use futures::future::join_all;
use tower_listing::{
    AnalysisError, BreakerScope, BreakerStatus, CancellationToken, ConfigBuilder, ErrorKind,
    HealthStatus, InferenceRequest, ListingOrchestrator, MockModel, ModelError, OrchestratorConfig,
    PromptKind, ReplyPolicy, TAG_COUNT,
};

const PRODUCT: &str = r#"```json
{"is_product": true, "image_type": "ceramic mug", "confidence": "high", "reason": "a mug on a table"}
```"#;
const RECEIPT: &str = r#"{"is_product": false, "image_type": "receipt", "confidence": "high", "reason": "payment receipt"}"#;
const LISTING: &str = r#"{"title": "Handmade Ceramic Mug", "description": "A glazed stoneware mug.", "tags": ["mug", "ceramic", "coffee", "handmade", "gift"]}"#;

fn config() -> ConfigBuilder {
    ConfigBuilder::new()
        .max_attempts(3)
        .backoff(Duration::from_millis(100), 2.0, Duration::from_secs(1))
        .failure_threshold(2)
        .cooldown(Duration::from_secs(30))
        .attempt_timeout(Some(Duration::from_secs(5)))
}

fn orchestrator(model: &MockModel, config: OrchestratorConfig) -> ListingOrchestrator<MockModel> {
    ListingOrchestrator::new(model.clone(), config)
}

fn request() -> InferenceRequest {
    InferenceRequest::new(vec![0xff, 0xd8, 0xff, 0xe0], "English")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test(start_paused = true)]
async fn scenario_a_product_yields_listing_with_five_tags() {
    init_tracing();
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .reply(PromptKind::Generate, LISTING);
    let orchestrator = orchestrator(&model, config().build());

    let listing = orchestrator.analyze(request()).await.unwrap();

    assert_eq!(listing.title, "Handmade Ceramic Mug");
    assert_eq!(listing.tags.len(), TAG_COUNT);
    assert_eq!(model.calls(PromptKind::Classify), 1);
    assert_eq!(model.calls(PromptKind::Generate), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_b_not_a_product_skips_generation() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, RECEIPT)
        .reply(PromptKind::Generate, LISTING);
    let orchestrator = orchestrator(&model, config().build());

    let err = orchestrator.analyze(request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotAProduct);
    assert_eq!(err.reason(), "payment receipt");
    assert!(matches!(
        err,
        AnalysisError::NotAProduct { category: Some(ref c), .. } if c == "receipt"
    ));
    assert!(!err.is_retryable());
    assert_eq!(model.calls(PromptKind::Generate), 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_exhausted_retries_count_as_one_breaker_failure() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .fail(PromptKind::Generate, ModelError::RateLimited("429".into()));
    let orchestrator = orchestrator(&model, config().build());

    let err = orchestrator.analyze(request()).await.unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::TransientDependency {
            stage: PromptKind::Generate,
            source: ModelError::RateLimited(_),
        }
    ));
    assert!(err.is_retryable());
    assert_eq!(model.calls(PromptKind::Generate), 3);

    let status = orchestrator.breaker_status();
    assert_eq!(status.generate.consecutive_failures, 1);
    assert_eq!(status.generate.status, BreakerStatus::Closed);
    assert_eq!(status.classify.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_open_breaker_rejects_without_calling_the_model() {
    let model = MockModel::new().fail(PromptKind::Classify, ModelError::Unavailable("503".into()));
    let orchestrator = orchestrator(&model, config().build());

    for _ in 0..2 {
        let err = orchestrator.analyze(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientDependency);
    }
    assert_eq!(orchestrator.breaker_status().classify.status, BreakerStatus::Open);
    let calls_before = model.calls(PromptKind::Classify);

    let err = orchestrator.analyze(request()).await.unwrap_err();

    match err {
        AnalysisError::CircuitOpen { stage, retry_after } => {
            assert_eq!(stage, PromptKind::Classify);
            assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_secs(30));
        }
        other => panic!("expected circuit open, got {other:?}"),
    }
    assert_eq!(model.calls(PromptKind::Classify), calls_before);
    assert_eq!(model.calls(PromptKind::Generate), 0);
}

#[tokio::test(start_paused = true)]
async fn probe_after_cooldown_closes_the_breaker() {
    let mut model = MockModel::new();
    for _ in 0..6 {
        model = model.fail(PromptKind::Classify, ModelError::Timeout("slow".into()));
    }
    let model = model
        .reply(PromptKind::Classify, PRODUCT)
        .reply(PromptKind::Generate, LISTING);
    let orchestrator = orchestrator(&model, config().build());

    for _ in 0..2 {
        assert!(orchestrator.analyze(request()).await.is_err());
    }
    assert_eq!(orchestrator.health().status, HealthStatus::Degraded);

    tokio::time::advance(Duration::from_secs(31)).await;
    let listing = orchestrator.analyze(request()).await.unwrap();

    assert_eq!(listing.tags[0], "mug");
    let status = orchestrator.breaker_status();
    assert_eq!(status.classify.status, BreakerStatus::Closed);
    assert_eq!(status.classify.consecutive_failures, 0);
    assert_eq!(orchestrator.health().status, HealthStatus::Healthy);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_not_retried() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .fail(PromptKind::Generate, ModelError::AuthFailed("bad key".into()));
    let orchestrator = orchestrator(&model, config().build());

    let err = orchestrator.analyze(request()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PermanentDependency);
    assert!(!err.is_retryable());
    assert_eq!(model.calls(PromptKind::Generate), 1);
    assert_eq!(orchestrator.breaker_status().generate.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn unparseable_classification_fails_open() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, "I think this is probably a mug")
        .reply(PromptKind::Generate, LISTING);
    let orchestrator = orchestrator(&model, config().build());

    let listing = orchestrator.analyze(request()).await.unwrap();

    assert_eq!(listing.title, "Handmade Ceramic Mug");
    assert_eq!(model.calls(PromptKind::Generate), 1);
}

#[tokio::test(start_paused = true)]
async fn strict_reply_policy_surfaces_malformed_reply() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .reply(PromptKind::Generate, "Title: Mug. Tags: none.");
    let orchestrator = orchestrator(&model, config().reply_policy(ReplyPolicy::Strict).build());

    let err = orchestrator.analyze(request()).await.unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::MalformedReply {
            stage: PromptKind::Generate,
            ..
        }
    ));
    assert_eq!(orchestrator.breaker_status().generate.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn lenient_reply_policy_builds_fallback_listing() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .reply(PromptKind::Generate, "A lovely mug, great for coffee.");
    let orchestrator = orchestrator(&model, config().build());

    let listing = orchestrator.analyze(request()).await.unwrap();

    assert_eq!(listing.title, "AI-Analyzed Product (English)");
    assert!(listing.description.starts_with("A lovely mug"));
    assert!(listing.tags.iter().all(|t| !t.is_empty()));
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_without_counting_a_failure() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .with_latency(Duration::from_secs(3));
    let orchestrator = orchestrator(&model, config().build());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let (result, _) = tokio::join!(
        orchestrator.analyze_with_cancel(request(), &cancel),
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        }
    );

    assert_eq!(result.unwrap_err(), AnalysisError::Cancelled);
    assert_eq!(model.calls(PromptKind::Generate), 0);
    assert_eq!(orchestrator.breaker_status().classify.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn slow_attempts_time_out_as_transient_failures() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .with_latency(Duration::from_secs(10));
    let orchestrator = orchestrator(&model, config().build());

    let err = orchestrator.analyze(request()).await.unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::TransientDependency {
            stage: PromptKind::Classify,
            source: ModelError::Timeout(_),
        }
    ));
    assert_eq!(model.calls(PromptKind::Classify), 3);
}

#[tokio::test(start_paused = true)]
async fn request_timeout_overrides_configured_timeout() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .reply(PromptKind::Generate, LISTING)
        .with_latency(Duration::from_secs(10));
    let orchestrator = orchestrator(&model, config().build());

    let listing = orchestrator
        .analyze(request().with_attempt_timeout(Duration::from_secs(20)))
        .await
        .unwrap();

    assert_eq!(listing.tags.len(), TAG_COUNT);
    assert_eq!(model.calls(PromptKind::Classify), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_analyses_progress_independently() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .reply(PromptKind::Generate, LISTING)
        .with_latency(Duration::from_millis(500));
    let orchestrator = orchestrator(&model, config().build());

    let started = tokio::time::Instant::now();
    let results = join_all((0..8).map(|i| {
        orchestrator.analyze(request().with_trace_id(format!("req-{i}")))
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(model.calls(PromptKind::Classify), 8);
    assert_eq!(model.calls(PromptKind::Generate), 8);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn reset_breaker_restores_service() {
    let model = MockModel::new().fail(PromptKind::Classify, ModelError::Unavailable("503".into()));
    let orchestrator = orchestrator(&model, config().build());
    for _ in 0..2 {
        let _ = orchestrator.analyze(request()).await;
    }

    let health = orchestrator.health();
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.breakers.status(), BreakerStatus::Open);
    assert!(health.breakers.classify.opened_at_utc.is_some());

    orchestrator.reset_breaker();

    let health = orchestrator.health();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.breakers.classify.consecutive_failures, 0);
    let err = orchestrator.analyze(request()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientDependency);
}

#[tokio::test(start_paused = true)]
async fn shared_scope_trips_both_stages_together() {
    let model = MockModel::new().fail(PromptKind::Classify, ModelError::Unavailable("503".into()));
    let orchestrator = orchestrator(
        &model,
        config().breaker_scope(BreakerScope::Shared).build(),
    );
    for _ in 0..2 {
        let _ = orchestrator.analyze(request()).await;
    }

    let status = orchestrator.breaker_status();
    assert_eq!(status.classify.status, BreakerStatus::Open);
    assert_eq!(status.generate.status, BreakerStatus::Open);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["scope"], "shared");
    assert_eq!(json["generate"]["status"], "open");
}

#[tokio::test(start_paused = true)]
async fn abandoned_recovery_call_lets_the_next_caller_retry_the_dependency() {
    let mut model = MockModel::new();
    for _ in 0..6 {
        model = model.fail(PromptKind::Classify, ModelError::Unavailable("503".into()));
    }
    let model = model
        .reply(PromptKind::Classify, PRODUCT)
        .reply(PromptKind::Generate, LISTING)
        .with_latency(Duration::from_secs(1));
    let orchestrator = orchestrator(&model, config().build());
    for _ in 0..2 {
        assert!(orchestrator.analyze(request()).await.is_err());
    }
    tokio::time::advance(Duration::from_secs(31)).await;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), orchestrator.analyze(request())).await;

    assert!(abandoned.is_err());
    let status = orchestrator.breaker_status();
    assert_eq!(status.classify.status, BreakerStatus::Open);
    assert_eq!(status.classify.consecutive_failures, 2);
    let calls_before = model.calls(PromptKind::Classify);

    let listing = orchestrator.analyze(request()).await.unwrap();

    assert_eq!(listing.title, "Handmade Ceramic Mug");
    assert_eq!(model.calls(PromptKind::Classify), calls_before + 1);
    assert_eq!(orchestrator.breaker_status().classify.status, BreakerStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn shared_scope_classification_success_resets_generation_streak() {
    let model = MockModel::new()
        .reply(PromptKind::Classify, PRODUCT)
        .fail(PromptKind::Generate, ModelError::Unavailable("503".into()));
    let orchestrator = orchestrator(
        &model,
        config().breaker_scope(BreakerScope::Shared).build(),
    );

    for _ in 0..4 {
        let err = orchestrator.analyze(request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientDependency);
    }

    let status = orchestrator.breaker_status();
    assert_eq!(status.generate.status, BreakerStatus::Closed);
    assert_eq!(status.generate.consecutive_failures, 1);
    assert_eq!(model.calls(PromptKind::Generate), 12);
}
