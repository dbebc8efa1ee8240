//! Reply codec: raw model text to typed verdicts and listings
//!
//! Model replies are JSON, often wrapped in markdown code fences. Parsing is
//! tolerant of the shapes the prompts produce in practice; anything beyond
//! that is a [`CodecError`] and the caller decides the policy.

use serde::Deserialize;
use thiserror::Error;

use crate::config::ReplyPolicy;
use crate::request::{language_name, ClassificationVerdict, ListingResult, TAG_COUNT};

const FALLBACK_DESCRIPTION_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("reply is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reply is incomplete: {0}")]
    Incomplete(String),
}

/// Remove surrounding whitespace and markdown code fences.
pub fn strip_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

#[derive(Deserialize)]
struct WireVerdict {
    #[serde(alias = "isProduct")]
    is_product: bool,
    #[serde(default, alias = "category")]
    image_type: Option<String>,
    #[serde(default)]
    confidence: Option<WireConfidence>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireConfidence {
    Score(f32),
    Label(String),
}

impl WireConfidence {
    fn score(&self) -> Option<f32> {
        match self {
            WireConfidence::Score(s) => Some(s.clamp(0.0, 1.0)),
            WireConfidence::Label(label) => match label.trim().to_ascii_lowercase().as_str() {
                "high" => Some(0.9),
                "medium" => Some(0.6),
                "low" => Some(0.3),
                _ => None,
            },
        }
    }
}

pub fn parse_verdict(text: &str) -> Result<ClassificationVerdict, CodecError> {
    let wire: WireVerdict = serde_json::from_str(strip_fences(text))?;
    Ok(ClassificationVerdict {
        is_product: wire.is_product,
        category: wire.image_type.filter(|c| !c.trim().is_empty()),
        reason: wire.reason.unwrap_or_default(),
        confidence: wire.confidence.as_ref().and_then(WireConfidence::score),
    })
}

/// Listing as the model returned it, before tag normalisation.
#[derive(Debug, Deserialize)]
pub struct RawListing {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub fn parse_listing(text: &str) -> Result<RawListing, CodecError> {
    Ok(serde_json::from_str(strip_fences(text))?)
}

/// Trim and dedupe tags, then fit them to exactly [`TAG_COUNT`].
///
/// Under [`ReplyPolicy::Strict`] a blank title/description or too few tags is
/// an error; under [`ReplyPolicy::Lenient`] short tag lists are padded.
pub fn normalize_listing(
    raw: RawListing,
    language: &str,
    policy: ReplyPolicy,
) -> Result<ListingResult, CodecError> {
    let title = raw.title.trim().to_string();
    let description = raw.description.trim().to_string();
    if policy == ReplyPolicy::Strict && (title.is_empty() || description.is_empty()) {
        return Err(CodecError::Incomplete("title or description is empty".into()));
    }

    let mut tags: Vec<String> = Vec::with_capacity(TAG_COUNT);
    for tag in raw.tags {
        let tag = tag.trim();
        if !tag.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
        if tags.len() == TAG_COUNT {
            break;
        }
    }
    if tags.len() < TAG_COUNT {
        if policy == ReplyPolicy::Strict {
            return Err(CodecError::Incomplete(format!(
                "expected {TAG_COUNT} distinct tags, got {}",
                tags.len()
            )));
        }
        pad_tags(&mut tags, language);
    }

    Ok(ListingResult {
        title,
        description,
        tags: into_tag_array(tags),
    })
}

/// Listing built from a reply that could not be parsed at all.
pub fn fallback_listing(raw_text: &str, language: &str) -> ListingResult {
    let language = language_name(language);
    let text = strip_fences(raw_text);
    let description = match text.char_indices().nth(FALLBACK_DESCRIPTION_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    };
    let mut tags = Vec::with_capacity(TAG_COUNT);
    pad_tags(&mut tags, language);
    ListingResult {
        title: format!("AI-Analyzed Product ({language})"),
        description,
        tags: into_tag_array(tags),
    }
}

fn pad_tags(tags: &mut Vec<String>, language: &str) {
    let language = language_name(language).trim().to_lowercase();
    let candidates = ["ai-analyzed", "product", language.as_str(), "quality", "recommended"];
    for candidate in candidates {
        if tags.len() == TAG_COUNT {
            return;
        }
        if !candidate.is_empty() && !tags.iter().any(|t| t.eq_ignore_ascii_case(candidate)) {
            tags.push(candidate.to_string());
        }
    }
    let mut n = 1;
    while tags.len() < TAG_COUNT {
        let candidate = format!("tag-{n}");
        if !tags.contains(&candidate) {
            tags.push(candidate);
        }
        n += 1;
    }
}

fn into_tag_array(tags: Vec<String>) -> [String; TAG_COUNT] {
    let mut iter = tags.into_iter();
    std::array::from_fn(|_| iter.next().unwrap_or_default())
}
