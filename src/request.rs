//! Request and result types shared by the pipeline and the orchestrator

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Number of tags in every listing.
pub const TAG_COUNT: usize = 5;

/// Full name for a two-letter language code; anything else is returned as given.
pub fn language_name(language: &str) -> &str {
    let code = language.trim();
    if code.len() != 2 {
        return language;
    }
    match code.to_ascii_lowercase().as_str() {
        "en" => "English",
        "th" => "Thai",
        "zh" => "Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ar" => "Arabic",
        _ => language,
    }
}

/// Which of the two model calls is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Classify,
    Generate,
}

impl fmt::Display for PromptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptKind::Classify => f.write_str("classification"),
            PromptKind::Generate => f.write_str("generation"),
        }
    }
}

/// One analysis request. Immutable once built.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    image: Arc<[u8]>,
    language: String,
    trace_id: Option<String>,
    attempt_timeout: Option<Duration>,
}

impl InferenceRequest {
    pub fn new(image: impl Into<Arc<[u8]>>, language: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            language: language.into(),
            trace_id: None,
            attempt_timeout: None,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Deadline for each external attempt; overrides the orchestrator default.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn image(&self) -> &Arc<[u8]> {
        &self.image
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }
}

/// Outcome of the classification gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub is_product: bool,
    pub category: Option<String>,
    pub reason: String,
    pub confidence: Option<f32>,
}

impl ClassificationVerdict {
    /// Verdict used when the classification reply cannot be interpreted.
    pub fn fail_open(reason: impl Into<String>) -> Self {
        Self {
            is_product: true,
            category: None,
            reason: reason.into(),
            confidence: None,
        }
    }
}

/// Generated listing returned to the caller on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingResult {
    pub title: String,
    pub description: String,
    pub tags: [String; TAG_COUNT],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_keeps_fields() {
        let req = InferenceRequest::new(vec![1u8, 2, 3], "th")
            .with_trace_id("abc")
            .with_attempt_timeout(Duration::from_secs(5));
        assert_eq!(req.image().len(), 3);
        assert_eq!(req.language(), "th");
        assert_eq!(req.trace_id(), Some("abc"));
        assert_eq!(req.attempt_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn language_codes_map_to_names() {
        assert_eq!(language_name("th"), "Thai");
        assert_eq!(language_name("PT"), "Portuguese");
        assert_eq!(language_name("German"), "German");
        assert_eq!(language_name("xx"), "xx");
    }

    #[test]
    fn prompt_kind_display() {
        assert_eq!(PromptKind::Classify.to_string(), "classification");
        assert_eq!(PromptKind::Generate.to_string(), "generation");
    }

    #[test]
    fn listing_serializes_tags_as_array() {
        let listing = ListingResult {
            title: "Mug".into(),
            description: "A mug.".into(),
            tags: ["a", "b", "c", "d", "e"].map(String::from),
        };
        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["tags"].as_array().unwrap().len(), TAG_COUNT);
    }
}
