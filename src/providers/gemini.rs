//! Gemini completion backend.
//!
//! Calls the `generateContent` endpoint. Completion only; embedding requests
//! are served by the OpenAI-compatible embedder regardless of which
//! completion backend is configured.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::CompletionConfig;
use crate::error::CoreError;

use super::{CompletionOptions, CompletionProvider};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// `generateContent` backend.
pub struct GeminiProvider {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl GeminiProvider {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CoreError> {
        let base = self
            .config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| CoreError::GenerationFailed("missing Gemini API key".to_string()))?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            base, self.config.model, key
        );

        let mut generation_config = json!({ "temperature": options.temperature });
        if let Some(max_tokens) = options.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": generation_config,
        });

        let response = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoreError::GenerationFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::GenerationFailed(format!(
                "status {}: {}",
                status, detail
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| CoreError::GenerationFailed(format!("malformed response: {}", e)))?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text))
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| CoreError::GenerationFailed("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_response_parses_first_text_part() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"pong"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        let text = parsed.candidates[0].content.parts[0].text.as_deref();
        assert_eq!(text, Some("pong"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_generation_failed() {
        let provider = GeminiProvider::new(CompletionConfig {
            api_key: None,
            ..CompletionConfig::default()
        });
        let err = provider
            .complete("hi", &CompletionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "generation_failed");
    }
}
