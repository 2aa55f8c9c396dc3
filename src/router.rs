//! Branch decision: which of the six resolution paths answers this query.
//!
//! The cascade is strict priority, evaluated once per query: extracted names
//! beat semantic entity matches, which beat document retrieval, which beats
//! the no-context fallback. Lower-priority work may run speculatively in
//! parallel, but its results are discarded when a higher branch fires.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{PersonaConfig, RetrievalSettings};
use crate::index::VectorSearcher;
use crate::providers::EmbeddingProvider;
use crate::resolver::ProfileResolver;
use crate::types::{Branch, CollectionTag, ContextBundle, EntityProfile, Query, RetrievalMatch};

/// Decides the branch and assembles the [`ContextBundle`] for one query.
pub struct Router {
    persona: PersonaConfig,
    retrieval: RetrievalSettings,
    resolver: Arc<ProfileResolver>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorSearcher>,
}

impl Router {
    pub fn new(
        persona: PersonaConfig,
        retrieval: RetrievalSettings,
        resolver: Arc<ProfileResolver>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorSearcher>,
    ) -> Self {
        Self {
            persona,
            retrieval,
            resolver,
            embedder,
            index,
        }
    }

    /// Route `query` given the names the extractor found in it.
    ///
    /// Never fails: provider and index errors degrade into lower-priority
    /// branches, bottoming out at [`Branch::NoContextFound`].
    pub async fn route(&self, query: &Query, names: &BTreeSet<String>) -> ContextBundle {
        // Callers reject empty text before the pipeline; guard anyway.
        if query.text.trim().is_empty() {
            return ContextBundle::new(Branch::NoContextFound);
        }

        if !names.is_empty() {
            return self.route_named(names).await;
        }
        self.route_semantic(query).await
    }

    /// Name path: every name resolved -> ProfileAnswer (or SelfIdentity for
    /// the persona's own name alone); any miss -> NotFound.
    async fn route_named(&self, names: &BTreeSet<String>) -> ContextBundle {
        if let Some(name) = self.sole_self_reference(names) {
            return self.self_identity_bundle(&name).await;
        }

        let resolution = self.resolver.resolve(names).await;
        let branch = if resolution.missing.is_empty() {
            Branch::ProfileAnswer
        } else {
            Branch::NotFound
        };
        tracing::debug!(
            ?branch,
            found = resolution.found.len(),
            missing = resolution.missing.len(),
            "name resolution complete"
        );

        let mut bundle = ContextBundle::new(branch);
        bundle.unresolved_names = resolution.missing.iter().cloned().collect();
        for profile in resolution.found.into_values() {
            if !bundle
                .resolved_profiles
                .iter()
                .any(|p| p.canonical_name == profile.canonical_name)
            {
                bundle.resolved_profiles.push(profile);
            }
        }
        self.attach_equipment(&mut bundle).await;
        bundle
    }

    /// Semantic path: entity search wins over document search; both may run
    /// concurrently since the document results cost nothing extra to discard.
    async fn route_semantic(&self, query: &Query) -> ContextBundle {
        let vector = match self.embedder.embed(&query.text).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("embedding unavailable, no semantic branches: {}", e);
                return ContextBundle::new(Branch::NoContextFound);
            }
        };

        let entity_config = self.retrieval.entities;
        let document_config = self.retrieval.documents;
        let (entity_matches, document_matches) = tokio::join!(
            self.search_or_empty(CollectionTag::Entities, &vector, entity_config.threshold, entity_config.top_k),
            self.search_or_empty(CollectionTag::Documents, &vector, document_config.threshold, document_config.top_k),
        );

        if !entity_matches.is_empty() {
            return self.semantic_entity_bundle(entity_matches).await;
        }
        if !document_matches.is_empty() {
            let mut bundle = ContextBundle::new(Branch::DocumentRag);
            bundle.document_matches = document_matches;
            return bundle;
        }
        ContextBundle::new(Branch::NoContextFound)
    }

    async fn semantic_entity_bundle(&self, entity_matches: Vec<RetrievalMatch>) -> ContextBundle {
        let mut bundle = ContextBundle::new(Branch::SemanticEntityAnswer);

        // Entity rows are keyed by canonical name; pull the full profiles so
        // the prompt gets attributes and media links, not just excerpts.
        let names: BTreeSet<String> = entity_matches
            .iter()
            .map(|m| m.record_ref.clone())
            .collect();
        let resolution = self.resolver.resolve(&names).await;
        for m in &entity_matches {
            if let Some(profile) = resolution.found.get(&m.record_ref) {
                if !bundle
                    .resolved_profiles
                    .iter()
                    .any(|p| p.canonical_name == profile.canonical_name)
                {
                    bundle.resolved_profiles.push(profile.clone());
                }
            }
        }
        bundle.entity_matches = entity_matches;
        self.attach_equipment(&mut bundle).await;
        bundle
    }

    async fn self_identity_bundle(&self, name: &str) -> ContextBundle {
        let mut bundle = ContextBundle::new(Branch::SelfIdentity);
        let names = BTreeSet::from([name.to_string()]);
        let resolution = self.resolver.resolve(&names).await;
        let profile = resolution
            .found
            .into_values()
            .next()
            .unwrap_or_else(|| self.persona_profile());
        bundle.resolved_profiles.push(profile);
        bundle
    }

    /// The persona's own profile, synthesized from config when the store has
    /// no record of it. Keeps SelfIdentity deterministic.
    fn persona_profile(&self) -> EntityProfile {
        let mut profile = EntityProfile::new(self.persona.self_name.clone())
            .with_power(self.persona.power_metrics);
        profile.media_links = self.persona.media_links_for(&self.persona.self_name);
        profile
    }

    fn sole_self_reference(&self, names: &BTreeSet<String>) -> Option<String> {
        if names.len() != 1 {
            return None;
        }
        names
            .iter()
            .next()
            .filter(|n| n.eq_ignore_ascii_case(&self.persona.self_name))
            .cloned()
    }

    async fn attach_equipment(&self, bundle: &mut ContextBundle) {
        let owners: BTreeSet<String> = bundle
            .resolved_profiles
            .iter()
            .map(|p| p.canonical_name.clone())
            .collect();
        if owners.is_empty() {
            return;
        }
        for record in self.resolver.equipment_for(&owners).await {
            bundle.equipment.insert(record.owner_name.clone(), record);
        }
    }

    async fn search_or_empty(
        &self,
        collection: CollectionTag,
        vector: &[f32],
        threshold: f64,
        top_k: usize,
    ) -> Vec<RetrievalMatch> {
        match self.index.search(collection, vector, threshold, top_k).await {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!("{} search failed, treating as empty: {}", collection.as_str(), e);
                Vec::new()
            }
        }
    }
}
