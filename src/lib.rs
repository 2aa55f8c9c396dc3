//! persona-rag: persona-grounded question answering over profiles,
//! semantic entity search and document retrieval.
//!
//! One query flows through four stages: name extraction, branch routing,
//! persona prompt assembly and answer synthesis. External capabilities
//! (completion, embedding, vector search, profile storage, history) sit
//! behind traits so hosts can swap the in-memory implementations for real
//! backends without touching the pipeline.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use persona_rag::{
//!     build_completion_provider, build_embedding_provider, AnswerSynthesizer, AppConfig,
//!     InMemoryHistoryStore, InMemoryProfileSource, InMemoryVectorIndex,
//! };
//!
//! # async fn run() -> Result<(), persona_rag::CoreError> {
//! let config = AppConfig::from_env();
//! let completion = build_completion_provider(&config.completion);
//! let embedder = build_embedding_provider(&config.completion, &config.embedding);
//! let history = Arc::new(InMemoryHistoryStore::new(&config.history));
//!
//! let synthesizer = AnswerSynthesizer::new(
//!     config,
//!     completion,
//!     embedder,
//!     Arc::new(InMemoryVectorIndex::new()),
//!     Arc::new(InMemoryProfileSource::default()),
//!     history,
//! )?;
//! let output = synthesizer
//!     .resolve_and_answer("Who is Sorane?", "user-1", "en", "default", None)
//!     .await;
//! println!("{}", output.text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extractor;
pub mod history;
pub mod index;
pub mod prompt;
pub mod providers;
pub mod resolver;
pub mod router;
pub mod synthesizer;
pub mod types;

pub use config::{
    AppConfig, CompletionConfig, EmbeddingConfig, HistoryConfig, PersonaConfig,
    ProfileCacheConfig, ProviderKind, RetrievalConfig, RetrievalSettings,
};
pub use error::CoreError;
pub use extractor::NameExtractor;
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use index::{cosine_similarity, InMemoryVectorIndex, VectorSearcher};
pub use prompt::PersonaPromptBuilder;
pub use providers::{
    build_completion_provider, build_embedding_provider, CompletionOptions, CompletionProvider,
    EmbeddingProvider,
};
pub use resolver::{InMemoryProfileSource, ProfileResolver, ProfileSource, Resolution};
pub use router::Router;
pub use synthesizer::AnswerSynthesizer;
pub use types::{
    AnswerOutput, Branch, CollectionTag, ContextBundle, ConversationTurn, DocumentChunk,
    EntityProfile, EquipmentRecord, PowerMetrics, Query, RetrievalMatch, SourceSummary, TurnRole,
};

/// Crate version, from Cargo metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
