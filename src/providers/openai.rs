//! OpenAI-compatible chat completion and embedding backends.
//!
//! Talks to the Chat Completions and Embeddings endpoints over `reqwest`.
//! A custom `base_url` pointing at any OpenAI-compatible server is honored,
//! which is also how local inference gateways are wired in.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{CompletionConfig, EmbeddingConfig};
use crate::error::CoreError;

use super::{CompletionOptions, CompletionProvider, EmbeddingProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Completion backend
// ---------------------------------------------------------------------------

/// Chat Completions backend.
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl OpenAiProvider {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String, CoreError> {
        let url = format!("{}/chat/completions", self.base_url());
        let mut body = json!({
            "model": self.config.model,
            "messages": [ChatMessage { role: "user", content: prompt }],
            "temperature": options.temperature,
        });
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let mut request = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
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

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::GenerationFailed(format!("malformed response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| CoreError::GenerationFailed("empty completion".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Embedding backend
// ---------------------------------------------------------------------------

/// Embeddings backend against the same OpenAI-compatible server.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: Option<String>,
    config: EmbeddingConfig,
}

impl OpenAiEmbedder {
    pub fn new(api_key: Option<String>, base_url: Option<String>, config: EmbeddingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            config,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let base = self
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let url = format!("{}/embeddings", base);
        let body = json!({
            "model": self.config.model,
            "input": text,
        });

        let mut request = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::EmbeddingUnavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoreError::EmbeddingUnavailable(format!(
                "status {}: {}",
                status, detail
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::EmbeddingUnavailable(format!("malformed response: {}", e)))?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| CoreError::EmbeddingUnavailable("empty embedding".to_string()))?;

        if vector.len() != self.config.dimensions {
            log::warn!(
                "embedding dimension {} differs from configured {}",
                vector.len(),
                self.config.dimensions
            );
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let provider = OpenAiProvider::new(CompletionConfig {
            base_url: Some("https://gateway.local/v1/".to_string()),
            ..CompletionConfig::default()
        });
        assert_eq!(provider.base_url(), "https://gateway.local/v1");
    }

    #[test]
    fn test_chat_response_parses_first_choice() {
        let raw = r#"{"choices":[{"message":{"content":"hello"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("hello"));
    }

    #[test]
    fn test_embedding_response_parses_vector() {
        let raw = r#"{"data":[{"embedding":[0.1,0.2]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data[0].embedding.len(), 2);
    }
}
