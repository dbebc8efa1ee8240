//! Model provider abstraction
//!
//! What this module provides
//! - The one external capability the pipeline consumes, as a Tower service:
//!   `Service<ModelCall, Response = RawReply, Error = ModelError>`
//!
//! Exports
//! - Models
//!   - `ModelCall { kind, image, language }`
//!   - `RawReply { text }`
//! - Services
//!   - `OpenAiVisionClient`: any OpenAI-compatible chat endpoint with vision input
//!   - `MockModel`: scripted replies per prompt kind with call counters
//!
//! Composition
//! - The pipeline clones the service per attempt, so implementations should be cheap to clone
//! - For testing, swap in `MockModel` and assert on `calls(kind)`

pub mod openai;
pub mod prompts;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tower::Service;

pub use openai::OpenAiVisionClient;

use crate::error::ModelError;
use crate::request::PromptKind;

/// One request to the external model.
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub kind: PromptKind,
    pub image: Arc<[u8]>,
    pub language: String,
}

/// Unparsed model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub text: String,
}

impl RawReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Default)]
struct Script {
    classify: VecDeque<Result<String, ModelError>>,
    generate: VecDeque<Result<String, ModelError>>,
}

impl Script {
    fn queue(&mut self, kind: PromptKind) -> &mut VecDeque<Result<String, ModelError>> {
        match kind {
            PromptKind::Classify => &mut self.classify,
            PromptKind::Generate => &mut self.generate,
        }
    }
}

/// Scripted model for tests and demos.
///
/// Replies are consumed in order per prompt kind; the last one repeats once
/// the queue is down to it. Clones share the script and counters.
#[derive(Clone, Default)]
pub struct MockModel {
    script: Arc<Mutex<Script>>,
    classify_calls: Arc<AtomicUsize>,
    generate_calls: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, kind: PromptKind, text: impl Into<String>) -> Self {
        self.push(kind, Ok(text.into()))
    }

    pub fn fail(self, kind: PromptKind, error: ModelError) -> Self {
        self.push(kind, Err(error))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn push(self, kind: PromptKind, entry: Result<String, ModelError>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue(kind)
            .push_back(entry);
        self
    }

    /// Number of calls received for `kind`.
    pub fn calls(&self, kind: PromptKind) -> usize {
        self.counter(kind).load(Ordering::SeqCst)
    }

    fn counter(&self, kind: PromptKind) -> &AtomicUsize {
        match kind {
            PromptKind::Classify => &self.classify_calls,
            PromptKind::Generate => &self.generate_calls,
        }
    }

    fn next(&self, kind: PromptKind) -> Result<String, ModelError> {
        let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = script.queue(kind);
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| Err(no_script(kind)))
        } else {
            queue.front().cloned().unwrap_or_else(|| Err(no_script(kind)))
        }
    }
}

fn no_script(kind: PromptKind) -> ModelError {
    ModelError::Unavailable(format!("no scripted {kind} reply"))
}

impl Service<ModelCall> for MockModel {
    type Response = RawReply;
    type Error = ModelError;
    type Future = BoxFuture<'static, Result<RawReply, ModelError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: ModelCall) -> Self::Future {
        self.counter(call.kind).fetch_add(1, Ordering::SeqCst);
        let reply = self.next(call.kind);
        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            reply.map(RawReply::new)
        })
    }
}
