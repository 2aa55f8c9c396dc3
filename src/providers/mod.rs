//! Completion and embedding provider traits plus the backend factory.
//!
//! The pipeline only ever sees these two traits; which HTTP backend sits
//! behind them is decided once at startup by [`build_completion_provider`]
//! and [`build_embedding_provider`], keyed by the explicit
//! [`ProviderKind`](crate::config::ProviderKind) enum.

pub mod gemini;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{CompletionConfig, EmbeddingConfig, ProviderKind};
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Per-call generation knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Text generation backend.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::GenerationFailed`] on HTTP, timeout or
    /// malformed-response failures. Retrying is the caller's business.
    async fn complete(&self, prompt: &str, options: &CompletionOptions)
        -> Result<String, CoreError>;
}

/// Text embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text` into a dense vector.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmbeddingUnavailable`] on any failure; callers
    /// recover by skipping the affected semantic branch.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError>;
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Build the completion backend selected by the config.
pub fn build_completion_provider(config: &CompletionConfig) -> Arc<dyn CompletionProvider> {
    match config.provider {
        ProviderKind::OpenAi => Arc::new(openai::OpenAiProvider::new(config.clone())),
        ProviderKind::Gemini => Arc::new(gemini::GeminiProvider::new(config.clone())),
    }
}

/// Build the embedding backend.
///
/// Embeddings always go through the OpenAI-compatible endpoint; the Gemini
/// backend is completion-only, so a Gemini completion setup still pairs with
/// an OpenAI-compatible embedder.
pub fn build_embedding_provider(
    completion: &CompletionConfig,
    embedding: &EmbeddingConfig,
) -> Arc<dyn EmbeddingProvider> {
    Arc::new(openai::OpenAiEmbedder::new(
        completion.api_key.clone(),
        completion.base_url.clone(),
        embedding.clone(),
    ))
}
