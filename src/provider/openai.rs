//! OpenAI-compatible vision client
//!
//! Sends the prompt plus the image as a base64 data URL to a chat completions
//! endpoint. Works against any OpenAI-compatible API (set the base URL for
//! hosted Gemini or a local gateway).

use std::task::{Context, Poll};

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
    },
    Client,
};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::future::BoxFuture;
use tower::Service;
use tracing::debug;

use super::prompts::prompt_for;
use super::{ModelCall, RawReply};
use crate::error::ModelError;

#[derive(Clone)]
pub struct OpenAiVisionClient {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiVisionClient {
    /// Client reading `OPENAI_API_KEY` / `OPENAI_BASE_URL` defaults.
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_client(Client::new(), model)
    }

    pub fn with_client(client: Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.2,
        }
    }

    /// Client for an explicit OpenAI-compatible endpoint.
    pub fn with_endpoint(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_base(api_base)
            .with_api_key(api_key);
        Self::with_client(Client::with_config(config), model)
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, call: &ModelCall) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let text = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(prompt_for(call.kind, &call.language))
            .build()?;
        let image = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(
                ImageUrlArgs::default()
                    .url(data_url(&call.image))
                    .detail(ImageDetail::Auto)
                    .build()?,
            )
            .build()?;
        let parts: Vec<ChatCompletionRequestUserMessageContentPart> =
            vec![text.into(), image.into()];
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(parts)
            .build()?;
        CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(self.temperature)
            .messages(vec![message.into()])
            .build()
    }
}

impl Service<ModelCall> for OpenAiVisionClient {
    type Response = RawReply;
    type Error = ModelError;
    type Future = BoxFuture<'static, Result<RawReply, ModelError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: ModelCall) -> Self::Future {
        let request = self.build_request(&call);
        let client = self.client.clone();
        let kind = call.kind;
        Box::pin(async move {
            let request = request.map_err(map_openai_error)?;
            debug!(model = %request.model, %kind, "sending model request");
            let response = client
                .chat()
                .create(request)
                .await
                .map_err(map_openai_error)?;
            let text = response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .filter(|text| !text.trim().is_empty())
                .ok_or_else(|| ModelError::Unavailable("model returned an empty reply".into()))?;
            Ok(RawReply { text })
        })
    }
}

/// `data:<mime>;base64,<payload>` for the image bytes.
pub fn data_url(image: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        sniff_mime(image),
        BASE64_STANDARD.encode(image)
    )
}

/// Image MIME type from magic bytes; JPEG when unknown.
pub fn sniff_mime(image: &[u8]) -> &'static str {
    if image.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if image.starts_with(b"GIF8") {
        "image/gif"
    } else if image.len() >= 12 && &image[..4] == b"RIFF" && &image[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

pub fn map_openai_error(err: OpenAIError) -> ModelError {
    match err {
        OpenAIError::ApiError(api) => {
            from_api_error(&api.message, api.r#type.as_deref(), api.code.as_deref())
        }
        OpenAIError::Reqwest(e) => {
            if e.is_timeout() {
                ModelError::Timeout(e.to_string())
            } else if let Some(status) = e.status() {
                from_status(status.as_u16(), e.to_string())
            } else {
                ModelError::Unavailable(e.to_string())
            }
        }
        OpenAIError::InvalidArgument(message) => ModelError::MalformedInput(message),
        other => ModelError::Unavailable(other.to_string()),
    }
}

/// Map an API error body onto the dependency failure kinds.
pub fn from_api_error(message: &str, kind: Option<&str>, code: Option<&str>) -> ModelError {
    let tags = format!(
        "{} {} {}",
        kind.unwrap_or_default(),
        code.unwrap_or_default(),
        message
    )
    .to_ascii_lowercase();
    let message = message.to_string();

    if tags.contains("insufficient_quota") {
        ModelError::QuotaExhausted(message)
    } else if tags.contains("rate_limit")
        || tags.contains("rate limit")
        || tags.contains("resource_exhausted")
    {
        ModelError::RateLimited(message)
    } else if tags.contains("invalid_api_key")
        || tags.contains("authentication")
        || tags.contains("permission")
        || tags.contains("unauthenticated")
    {
        ModelError::AuthFailed(message)
    } else if tags.contains("invalid_request") || tags.contains("invalid_argument") {
        ModelError::MalformedInput(message)
    } else if tags.contains("timeout") || tags.contains("deadline") {
        ModelError::Timeout(message)
    } else {
        ModelError::Unavailable(message)
    }
}

/// Map an HTTP status onto the dependency failure kinds.
pub fn from_status(status: u16, message: String) -> ModelError {
    match status {
        401 | 403 => ModelError::AuthFailed(message),
        408 | 504 => ModelError::Timeout(message),
        429 => ModelError::RateLimited(message),
        400 | 404 | 413 | 415 | 422 => ModelError::MalformedInput(message),
        _ => ModelError::Unavailable(message),
    }
}
