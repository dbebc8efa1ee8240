//! Prompt text for the two model calls.

use crate::request::{language_name, PromptKind, TAG_COUNT};

/// Prompt text for `kind`; two-letter language codes are spelled out.
pub fn prompt_for(kind: PromptKind, language: &str) -> String {
    let language = language_name(language);
    match kind {
        PromptKind::Classify => classification(language),
        PromptKind::Generate => generation(language),
    }
}

fn classification(language: &str) -> String {
    format!(
        "You screen uploads for an e-commerce listing tool.\n\
         Decide whether the image shows a physical product that could be sold online \
         (any condition, packaged or not). Receipts, payment slips, screenshots, documents, \
         QR codes, tickets, memes and blank or text-only images are not products.\n\
         Reply with JSON only:\n\
         {{\"is_product\": true|false, \"image_type\": \"what the image shows\", \
         \"confidence\": \"high\"|\"medium\"|\"low\", \
         \"reason\": \"one sentence in {language} explaining the decision\"}}"
    )
}

fn generation(language: &str) -> String {
    format!(
        "You write e-commerce listings. Using only what is visible in the image, write \
         everything in {language}.\n\
         Reply with JSON only:\n\
         {{\"title\": \"SEO-friendly title, at most 60 characters\", \
         \"description\": \"2-4 sentences on features, materials and use\", \
         \"tags\": [exactly {TAG_COUNT} search keywords]}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_mention_language_and_shape() {
        let c = prompt_for(PromptKind::Classify, "Thai");
        assert!(c.contains("in Thai"));
        assert!(c.contains("\"is_product\""));

        let g = prompt_for(PromptKind::Generate, "German");
        assert!(g.contains("in German"));
        assert!(g.contains("exactly 5"));
    }

    #[test]
    fn language_codes_are_spelled_out() {
        let c = prompt_for(PromptKind::Classify, "th");
        assert!(c.contains("in Thai"));
        assert!(!c.contains("in th "));
    }
}
