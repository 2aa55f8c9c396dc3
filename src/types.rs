//! Core data model for the query-resolution and retrieval-routing pipeline.
//!
//! Everything here is either immutable once constructed (`Query`), read-only
//! to the core (`EntityProfile`, `EquipmentRecord`, `DocumentChunk`) or
//! scoped to a single request (`RetrievalMatch`, `ContextBundle`).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A single free-text question as received from the caller.
///
/// Immutable once received; the pipeline never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    /// The raw question text.
    pub text: String,
    /// Caller identity, used to key conversation history.
    pub user_id: String,
    /// Requested answer language (BCP 47-ish tag, e.g. "en", "zh-TW").
    pub language: String,
    /// Which persona should answer.
    pub persona_id: String,
    /// Optional identifier of the frontend that issued the request.
    pub frontend_source: Option<String>,
}

impl Query {
    /// Create a query with the given text and user, answering in `language`
    /// with persona `persona_id`.
    pub fn new(
        text: impl Into<String>,
        user_id: impl Into<String>,
        language: impl Into<String>,
        persona_id: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            language: language.into(),
            persona_id: persona_id.into(),
            frontend_source: None,
        }
    }

    /// Attach the originating frontend identifier.
    pub fn with_frontend_source(mut self, source: impl Into<String>) -> Self {
        self.frontend_source = Some(source.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Entity profiles and equipment
// ---------------------------------------------------------------------------

/// Ordered power scores for an entity.
///
/// The sum of the three scores drives the relative-tone policy in the
/// prompt builder: entities stronger than the persona get deferential
/// wording, weaker ones get dismissive wording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerMetrics {
    pub physical: f64,
    pub magic: f64,
    pub utility: f64,
}

impl PowerMetrics {
    pub fn new(physical: f64, magic: f64, utility: f64) -> Self {
        Self {
            physical,
            magic,
            utility,
        }
    }

    /// Combined power score used for ranking and tone selection.
    pub fn total(&self) -> f64 {
        self.physical + self.magic + self.utility
    }
}

/// Structured record describing a named entity (character).
///
/// Owned by the profile store; the core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityProfile {
    /// Canonical display name, unique within the profile store.
    pub canonical_name: String,
    /// Alternative names this profile answers to.
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// Free-form trait -> value attributes (race, profession, likes, ...).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Power scores, see [`PowerMetrics`].
    #[serde(default)]
    pub power_metrics: PowerMetrics,
    /// Media links emitted, in order, after this entity's commentary.
    #[serde(default)]
    pub media_links: Vec<String>,
}

impl EntityProfile {
    pub fn new(canonical_name: impl Into<String>) -> Self {
        Self {
            canonical_name: canonical_name.into(),
            aliases: BTreeSet::new(),
            attributes: BTreeMap::new(),
            power_metrics: PowerMetrics::default(),
            media_links: Vec::new(),
        }
    }

    /// Add an alias this profile answers to.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    /// Set a trait attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Set the power metrics.
    pub fn with_power(mut self, metrics: PowerMetrics) -> Self {
        self.power_metrics = metrics;
        self
    }

    /// Append a media link.
    pub fn with_media_link(mut self, url: impl Into<String>) -> Self {
        self.media_links.push(url.into());
        self
    }

    /// Whether this profile answers to `name`: exact canonical match first,
    /// then case-insensitive match against the canonical name and aliases.
    pub fn matches_name(&self, name: &str) -> bool {
        if self.canonical_name == name {
            return true;
        }
        if self.canonical_name.eq_ignore_ascii_case(name) {
            return true;
        }
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

/// An equipment item linked to an entity. Zero-or-one per entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentRecord {
    /// Foreign key to [`EntityProfile::canonical_name`].
    pub owner_name: String,
    /// Item name.
    pub name: String,
    /// Free-form attributes of the item.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub base_damage: f64,
    pub bonus_damage: f64,
}

impl EquipmentRecord {
    pub fn new(owner_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner_name: owner_name.into(),
            name: name.into(),
            attributes: BTreeMap::new(),
            base_damage: 0.0,
            bonus_damage: 0.0,
        }
    }

    pub fn with_damage(mut self, base: f64, bonus: f64) -> Self {
        self.base_damage = base;
        self.bonus_damage = bonus;
        self
    }
}

// ---------------------------------------------------------------------------
// Documents and retrieval matches
// ---------------------------------------------------------------------------

/// A chunk of a source document with its precomputed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub source_path: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub timestamp: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn new(
        id: impl Into<String>,
        source_path: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            source_path: source_path.into(),
            text: text.into(),
            embedding,
            timestamp: Utc::now(),
        }
    }
}

/// The three logical vector collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionTag {
    Documents,
    Entities,
    Equipment,
}

impl CollectionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionTag::Documents => "documents",
            CollectionTag::Entities => "entities",
            CollectionTag::Equipment => "equipment",
        }
    }
}

/// One nearest-neighbor hit, produced transiently per query.
///
/// `excerpt` carries the matched record's text content so the prompt builder
/// can ground the answer without another round trip to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalMatch {
    /// Identifier of the matched record within its collection.
    pub record_ref: String,
    /// Text content of the matched record.
    pub excerpt: String,
    /// Cosine similarity in `[0, 1]`, computed as `1 - cosine_distance`.
    pub similarity_score: f64,
    /// Which collection produced the hit.
    pub collection: CollectionTag,
}

// ---------------------------------------------------------------------------
// Branch and context bundle
// ---------------------------------------------------------------------------

/// The mutually exclusive resolution path chosen by the router for one query.
///
/// Each branch selects exactly one prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// The query asked about the persona itself.
    SelfIdentity,
    /// Every extracted name resolved to a profile.
    ProfileAnswer,
    /// One or more extracted names failed to resolve.
    NotFound,
    /// No names, but the entity collection matched semantically.
    SemanticEntityAnswer,
    /// No names, no entity match, but documents matched.
    DocumentRag,
    /// Nothing matched anywhere (or the query was empty).
    NoContextFound,
}

impl Branch {
    /// Name of the prompt template associated with this branch.
    pub fn template_name(&self) -> &'static str {
        match self {
            Branch::SelfIdentity => "self_identity",
            Branch::ProfileAnswer => "profile_answer",
            Branch::NotFound => "not_found",
            Branch::SemanticEntityAnswer => "semantic_entity_answer",
            Branch::DocumentRag => "document_rag",
            Branch::NoContextFound => "no_context_found",
        }
    }
}

/// Everything the prompt builder needs for one request.
///
/// Invariants: `resolved_profiles` contains no duplicate canonical name;
/// match sequences are ordered by non-increasing similarity score; `branch`
/// is set exactly once, by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Profiles to comment on, in presentation order.
    pub resolved_profiles: Vec<EntityProfile>,
    /// Equipment joined by owner name. Zero-or-one entry per profile.
    pub equipment: BTreeMap<String, EquipmentRecord>,
    /// Ranked document hits (DocumentRag branch).
    pub document_matches: Vec<RetrievalMatch>,
    /// Ranked entity hits (SemanticEntityAnswer branch).
    pub entity_matches: Vec<RetrievalMatch>,
    /// Names that failed to resolve (NotFound branch).
    pub unresolved_names: Vec<String>,
    /// The branch that fired.
    pub branch: Branch,
}

impl ContextBundle {
    /// Create an empty bundle for the given branch.
    pub fn new(branch: Branch) -> Self {
        Self {
            resolved_profiles: Vec::new(),
            equipment: BTreeMap::new(),
            document_matches: Vec::new(),
            entity_matches: Vec::new(),
            unresolved_names: Vec::new(),
            branch,
        }
    }

    /// Canonical names of the resolved profiles, in presentation order.
    pub fn matched_entities(&self) -> Vec<String> {
        self.resolved_profiles
            .iter()
            .map(|p| p.canonical_name.clone())
            .collect()
    }

    /// Compact summary of what grounded the answer.
    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            profiles: self.matched_entities(),
            documents: self
                .document_matches
                .iter()
                .map(|m| m.record_ref.clone())
                .collect(),
            unresolved: self.unresolved_names.clone(),
        }
    }
}

/// Summary of the context that grounded an answer, returned to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSummary {
    pub profiles: Vec<String>,
    pub documents: Vec<String>,
    pub unresolved: Vec<String>,
}

// ---------------------------------------------------------------------------
// Conversation history
// ---------------------------------------------------------------------------

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// One turn in a conversation. Append-only, owned by the history store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Answer output
// ---------------------------------------------------------------------------

/// Final result of `resolve_and_answer`, returned to the caller.
///
/// Failures never surface as raw errors at this boundary: `success: false`
/// plus `error_kind` is the error shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOutput {
    pub success: bool,
    /// The answer text (or a degraded apology / rejection message).
    pub text: String,
    pub branch: Branch,
    pub matched_entities: Vec<String>,
    pub source_summary: SourceSummary,
    /// Set only when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_metrics_total() {
        let metrics = PowerMetrics::new(100.0, 50.0, 25.0);
        assert_eq!(metrics.total(), 175.0);
    }

    #[test]
    fn test_profile_matches_name() {
        let profile = EntityProfile::new("Sorane")
            .with_alias("Sky Singer")
            .with_alias("S-01");

        assert!(profile.matches_name("Sorane"));
        assert!(profile.matches_name("sorane"));
        assert!(profile.matches_name("sky singer"));
        assert!(profile.matches_name("s-01"));
        assert!(!profile.matches_name("Someone Else"));
    }

    #[test]
    fn test_branch_template_names_are_distinct() {
        let branches = [
            Branch::SelfIdentity,
            Branch::ProfileAnswer,
            Branch::NotFound,
            Branch::SemanticEntityAnswer,
            Branch::DocumentRag,
            Branch::NoContextFound,
        ];
        let names: std::collections::BTreeSet<_> =
            branches.iter().map(|b| b.template_name()).collect();
        assert_eq!(names.len(), branches.len());
    }

    #[test]
    fn test_bundle_summary() {
        let mut bundle = ContextBundle::new(Branch::ProfileAnswer);
        bundle.resolved_profiles.push(EntityProfile::new("Sorane"));
        bundle.unresolved_names.push("Zyx".to_string());

        let summary = bundle.summary();
        assert_eq!(summary.profiles, vec!["Sorane"]);
        assert_eq!(summary.unresolved, vec!["Zyx"]);
        assert!(summary.documents.is_empty());
    }

    #[test]
    fn test_query_builder() {
        let query = Query::new("Who is Sorane?", "u1", "en", "default")
            .with_frontend_source("web");
        assert_eq!(query.frontend_source.as_deref(), Some("web"));
    }
}
