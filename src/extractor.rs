//! Constrained name extraction from query text.
//!
//! The extractor asks the completion model which known-style names appear
//! literally in the query, then distrusts the answer: every returned token is
//! substring-checked against the normalized query and dropped if absent.
//! Identity questions ("who are you", 你是誰, あなたは誰) bypass the model
//! entirely and resolve to the persona's own name.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::providers::{CompletionOptions, CompletionProvider};

/// Marker instruction shared by every extraction prompt. Stub providers in
/// tests key off it to tell extraction calls apart from answer calls.
pub(crate) const EXTRACTION_FORMAT_HINT: &str =
    "Reply with only the names, separated by commas, or an empty line if none.";

static IDENTITY_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn identity_patterns() -> &'static [Regex] {
    IDENTITY_PATTERNS.get_or_init(|| {
        [
            r"(?i)\bwho\s+are\s+you\b",
            r"(?i)\bwhat(?:'s| is)\s+your\s+name\b",
            r"你是誰",
            r"你是谁",
            r"你叫什麼",
            r"你叫什么",
            r"あなたは誰",
            r"お名前は",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("identity pattern must compile"))
        .collect()
    })
}

/// True when the query asks the persona about its own identity.
pub fn is_identity_question(query_text: &str) -> bool {
    identity_patterns().iter().any(|p| p.is_match(query_text))
}

/// Lowercase and collapse runs of whitespace, for substring validation.
fn normalize(text: &str) -> String {
    text.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// LLM-backed name extractor with deterministic guards on both sides.
pub struct NameExtractor {
    completion: Arc<dyn CompletionProvider>,
}

impl NameExtractor {
    pub fn new(completion: Arc<dyn CompletionProvider>) -> Self {
        Self { completion }
    }

    fn extraction_prompt(query_text: &str) -> String {
        format!(
            "You are a strict name extractor. List every personal name that \
             appears LITERALLY in the user message below. Do not infer, \
             translate, complete or invent names; a name counts only if its \
             exact characters occur in the message. {}\n\nUser message:\n{}",
            EXTRACTION_FORMAT_HINT, query_text
        )
    }

    /// Extract the set of names mentioned in `query_text`.
    ///
    /// Identity questions short-circuit to `{self_name}`. Model output is
    /// validated token by token against the normalized query; the self name
    /// survives only when literally mentioned. Extraction failure yields an
    /// empty set, never an error.
    pub async fn extract(&self, query_text: &str, self_name: &str) -> BTreeSet<String> {
        if is_identity_question(query_text) {
            log::debug!("identity question detected, overriding extraction");
            return BTreeSet::from([self_name.to_string()]);
        }

        let options = CompletionOptions {
            temperature: 0.0,
            max_tokens: Some(64),
        };
        let raw = match self
            .completion
            .complete(&Self::extraction_prompt(query_text), &options)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("name extraction unavailable, failing open: {}", e);
                return BTreeSet::new();
            }
        };

        Self::validate(&raw, query_text, self_name)
    }

    /// Keep only tokens that literally occur in the query.
    fn validate(raw: &str, query_text: &str, self_name: &str) -> BTreeSet<String> {
        let normalized_query = normalize(query_text);
        let mut names = BTreeSet::new();
        for token in raw.split(',') {
            let token = token.trim().trim_matches(['"', '\'', '.']).trim();
            if token.is_empty() || token.eq_ignore_ascii_case("none") {
                continue;
            }
            let normalized_token = normalize(token);
            if !normalized_query.contains(&normalized_token) {
                log::debug!("discarding extracted name '{}': not in query", token);
                continue;
            }
            // The self name is easy for the model to hallucinate; require a
            // literal mention.
            if token.eq_ignore_ascii_case(self_name)
                && !normalized_query.contains(&normalize(self_name))
            {
                continue;
            }
            names.insert(token.to_string());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::error::CoreError;

    struct CannedCompletion {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl CompletionProvider for CannedCompletion {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, CoreError> {
            self.reply
                .clone()
                .map_err(CoreError::GenerationFailed)
        }
    }

    fn extractor(reply: Result<&str, &str>) -> NameExtractor {
        NameExtractor::new(Arc::new(CannedCompletion {
            reply: reply.map(str::to_string).map_err(str::to_string),
        }))
    }

    #[tokio::test]
    async fn test_identity_question_overrides_model() {
        let ex = extractor(Ok("Alice, Bob"));
        for q in ["Who are you?", "who  ARE you", "你是誰?", "あなたは誰ですか"] {
            let names = ex.extract(q, "Maya").await;
            assert_eq!(names, BTreeSet::from(["Maya".to_string()]), "query: {}", q);
        }
    }

    #[tokio::test]
    async fn test_hallucinated_names_are_discarded() {
        let ex = extractor(Ok("Sorane, Kagari"));
        let names = ex.extract("Tell me about Sorane's sword", "Maya").await;
        assert_eq!(names, BTreeSet::from(["Sorane".to_string()]));
    }

    #[tokio::test]
    async fn test_alias_present_in_query_is_kept_verbatim() {
        let ex = extractor(Ok("Sky Maiden"));
        let names = ex.extract("who is the Sky Maiden exactly?", "Maya").await;
        assert_eq!(names, BTreeSet::from(["Sky Maiden".to_string()]));
    }

    #[tokio::test]
    async fn test_self_name_needs_literal_mention() {
        let ex = extractor(Ok("Maya"));
        let names = ex.extract("what is the strongest weapon?", "Maya").await;
        assert!(names.is_empty());

        let ex = extractor(Ok("Maya"));
        let names = ex.extract("is Maya stronger than a dragon?", "Maya").await;
        assert_eq!(names, BTreeSet::from(["Maya".to_string()]));
    }

    #[tokio::test]
    async fn test_extraction_failure_fails_open() {
        let ex = extractor(Err("503"));
        let names = ex.extract("tell me about Sorane", "Maya").await;
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn test_none_and_empty_replies_yield_empty_set() {
        for reply in ["", "none", "None.", " , ,"] {
            let ex = extractor(Ok(reply));
            let names = ex.extract("how does a volcano work?", "Maya").await;
            assert!(names.is_empty(), "reply: {:?}", reply);
        }
    }
}
