//! Error taxonomy for the query-resolution pipeline.
//!
//! Most variants are recovered locally by the component that produced them:
//! extraction and embedding failures degrade into lower-priority branches,
//! profile lookup failures surface as "not found" answers. Only
//! [`CoreError::GenerationFailed`] is allowed to reach the caller, and even
//! then it is converted into an unsuccessful [`crate::types::AnswerOutput`]
//! rather than propagated as an error.

use thiserror::Error;

/// Errors produced by the core pipeline components.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The query text was empty or whitespace-only. Rejected before the
    /// pipeline runs; the only protocol-level rejection.
    #[error("query text must not be empty")]
    InvalidQuery,

    /// The name-extraction call failed or timed out. Recovered by failing
    /// open into the no-names path.
    #[error("name extraction unavailable: {0}")]
    ExtractionUnavailable(String),

    /// The embedding call failed or timed out. Recovered by skipping the
    /// affected semantic search and cascading to the next branch.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The upstream profile source failed. Recovered by treating the
    /// requested names as unresolved.
    #[error("profile lookup failed: {0}")]
    ProfileLookupFailed(String),

    /// The completion provider failed after the configured retries. Fatal
    /// for the request; produces a degraded apology response.
    #[error("completion generation failed: {0}")]
    GenerationFailed(String),

    /// A conversation-history write failed. Logged and ignored.
    #[error("history write failed: {0}")]
    HistoryWriteFailed(String),

    /// A prompt template failed to parse or render.
    #[error("prompt template error: {0}")]
    Template(String),
}

impl CoreError {
    /// Stable machine-readable kind string, used in the boundary error shape.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidQuery => "invalid_query",
            CoreError::ExtractionUnavailable(_) => "extraction_unavailable",
            CoreError::EmbeddingUnavailable(_) => "embedding_unavailable",
            CoreError::ProfileLookupFailed(_) => "profile_lookup_failed",
            CoreError::GenerationFailed(_) => "generation_failed",
            CoreError::HistoryWriteFailed(_) => "history_write_failed",
            CoreError::Template(_) => "template_error",
        }
    }
}
