//! Immutable application configuration.
//!
//! Built once at startup and passed by dependency injection into the router,
//! prompt builder and synthesizer. There is deliberately no process-global
//! state here: callers own the [`AppConfig`] and share it via `Arc`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::PowerMetrics;

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Which completion backend to use. Selected via an explicit factory keyed
/// by this value, never by reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown completion provider '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

/// The fixed character voice applied to generated answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Identifier matched against `Query::persona_id`.
    pub id: String,
    /// The persona's own name; identity questions resolve to it.
    pub self_name: String,
    /// Language the persona natively answers in. Queries in other languages
    /// trigger a translation step after generation.
    pub native_language: String,
    /// The persona's own power scores, baseline for the relative-tone policy.
    pub power_metrics: PowerMetrics,
    /// Base URL media links are derived from.
    pub media_base_url: String,
    /// Free-text description of voice and manner, embedded in every prompt.
    pub style: String,
}

impl PersonaConfig {
    /// Derive the four ordered media links for an entity name.
    pub fn media_links_for(&self, name: &str) -> Vec<String> {
        let base = self.media_base_url.trim_end_matches('/');
        vec![
            format!("{}/{}.png", base, name),
            format!("{}/{}Fighting.png", base, name),
            format!("{}/{}Ruined.png", base, name),
            format!("{}/Ravishing{}.png", base, name),
        ]
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            self_name: "Maya".to_string(),
            native_language: "en".to_string(),
            power_metrics: PowerMetrics::new(900.0, 700.0, 400.0),
            media_base_url: "https://example.invalid/media/people".to_string(),
            style: "You are cold, aristocratic and impatient. You answer \
                    reluctantly but always accurately, with clipped, disdainful \
                    phrasing. You never apologize for your tone."
                .to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

/// Per-collection similarity search settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum acceptable cosine similarity for a match.
    pub threshold: f64,
    /// Maximum number of matches returned.
    pub top_k: usize,
}

/// Retrieval settings for the searched collections. Equipment has no
/// settings here: it is joined relationally by owner name, never searched
/// by vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub documents: RetrievalConfig,
    pub entities: RetrievalConfig,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            documents: RetrievalConfig {
                threshold: 0.5,
                top_k: 3,
            },
            entities: RetrievalConfig {
                threshold: 0.5,
                top_k: 5,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Providers, history
// ---------------------------------------------------------------------------

/// Completion provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f64,
    /// Retries after the first failed generation attempt.
    pub max_retries: u32,
    /// Per-call timeout.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_retries: 1,
            timeout: Duration::from_secs(30),
            api_key: None,
            base_url: None,
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    /// Expected vector dimension; mismatches are logged, not fatal.
    pub dimensions: usize,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Conversation history settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// How many recent turns feed the prompt.
    pub tail_turns: usize,
    /// How long a user's history lives without activity.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            tail_turns: 6,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Profile-resolver cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCacheConfig {
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for ProfileCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            max_entries: 512,
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// The full, immutable pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub persona: PersonaConfig,
    pub retrieval: RetrievalSettings,
    pub completion: CompletionConfig,
    pub embedding: EmbeddingConfig,
    pub history: HistoryConfig,
    pub profile_cache: ProfileCacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            persona: PersonaConfig::default(),
            retrieval: RetrievalSettings::default(),
            completion: CompletionConfig::default(),
            embedding: EmbeddingConfig::default(),
            history: HistoryConfig::default(),
            profile_cache: ProfileCacheConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Recognized variables: `COMPLETION_PROVIDER`, `COMPLETION_MODEL`,
    /// `OPENAI_API_KEY` / `GEMINI_API_KEY`, `OPENAI_API_BASE`,
    /// `EMBEDDING_MODEL`, `PERSONA_NAME`, `PERSONA_LANGUAGE`,
    /// `MEDIA_BASE_URL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(provider) = std::env::var("COMPLETION_PROVIDER") {
            match provider.parse::<ProviderKind>() {
                Ok(kind) => config.completion.provider = kind,
                Err(e) => log::warn!("{}, keeping default", e),
            }
        }
        if let Ok(model) = std::env::var("COMPLETION_MODEL") {
            config.completion.model = model;
        }
        config.completion.api_key = match config.completion.provider {
            ProviderKind::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
            ProviderKind::Gemini => std::env::var("GEMINI_API_KEY").ok(),
        };
        config.completion.base_url = std::env::var("OPENAI_API_BASE").ok();
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(name) = std::env::var("PERSONA_NAME") {
            config.persona.self_name = name;
        }
        if let Ok(lang) = std::env::var("PERSONA_LANGUAGE") {
            config.persona.native_language = lang;
        }
        if let Ok(url) = std::env::var("MEDIA_BASE_URL") {
            config.persona.media_base_url = url;
        }

        config
    }
}

/// Serde helper: durations as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
