//! End-to-end wiring example: seed a small in-memory world, answer one
//! question from the command line, print the result as JSON.
//!
//! Requires provider credentials in the environment (see
//! `AppConfig::from_env`). Run with:
//!
//! ```text
//! persona-rag-demo "Who is Sorane?"
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future;

use persona_rag::{
    build_completion_provider, build_embedding_provider, AnswerSynthesizer, AppConfig,
    CollectionTag, EmbeddingProvider, EntityProfile, EquipmentRecord, InMemoryHistoryStore,
    InMemoryProfileSource, InMemoryVectorIndex, PowerMetrics,
};

fn demo_profiles(config: &AppConfig) -> Vec<EntityProfile> {
    let mut sorane = EntityProfile::new("Sorane")
        .with_alias("Sky Maiden")
        .with_attribute("race", "sylph")
        .with_attribute("profession", "wind dancer")
        .with_attribute("likes", "high places, thunderstorms")
        .with_power(PowerMetrics::new(300.0, 500.0, 100.0));
    sorane.media_links = config.persona.media_links_for("Sorane");

    let mut kagari = EntityProfile::new("Kagari")
        .with_attribute("race", "oni")
        .with_attribute("profession", "blacksmith")
        .with_power(PowerMetrics::new(1400.0, 200.0, 900.0));
    kagari.media_links = config.persona.media_links_for("Kagari");

    vec![sorane, kagari]
}

fn demo_equipment() -> Vec<EquipmentRecord> {
    vec![
        EquipmentRecord::new("Sorane", "Gale Fans").with_damage(120.0, 30.0),
        EquipmentRecord::new("Kagari", "Starforge Hammer").with_damage(400.0, 80.0),
    ]
}

const DEMO_DOCUMENTS: &[(&str, &str)] = &[
    (
        "doc-forge",
        "The Starforge sits below the oni quarter. Its coals never cool, and \
         every blade quenched there keeps a faint red glow.",
    ),
    (
        "doc-sky",
        "The floating city drifts with the trade winds. Its dancers read the \
         gusts the way sailors read currents.",
    ),
];

async fn seed_index(
    index: &InMemoryVectorIndex,
    embedder: &dyn EmbeddingProvider,
    profiles: &[EntityProfile],
) -> Result<()> {
    let entity_texts: Vec<String> = profiles
        .iter()
        .map(|profile| {
            let attributes = profile
                .attributes
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}. {}", profile.canonical_name, attributes)
        })
        .collect();

    let entity_vectors =
        future::try_join_all(entity_texts.iter().map(|text| embedder.embed(text)))
            .await
            .context("embedding seed profiles")?;
    for ((profile, text), vector) in profiles.iter().zip(&entity_texts).zip(entity_vectors) {
        index.insert_entity(&profile.canonical_name, vector, text);
    }

    let document_vectors =
        future::try_join_all(DEMO_DOCUMENTS.iter().map(|(_, text)| embedder.embed(text)))
            .await
            .context("embedding seed documents")?;
    for ((id, text), vector) in DEMO_DOCUMENTS.iter().zip(document_vectors) {
        index.upsert(CollectionTag::Documents, *id, vector, *text);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // The log-to-tracing bridge picks up the library's log macros too.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let question = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Who is Sorane?".to_string());

    let config = AppConfig::from_env();
    let completion = build_completion_provider(&config.completion);
    let embedder = build_embedding_provider(&config.completion, &config.embedding);

    let profiles = demo_profiles(&config);
    let index = Arc::new(InMemoryVectorIndex::new());
    seed_index(&index, embedder.as_ref(), &profiles).await?;

    let source = Arc::new(InMemoryProfileSource::new(profiles, demo_equipment()));
    let history = Arc::new(InMemoryHistoryStore::new(&config.history));

    let synthesizer =
        AnswerSynthesizer::new(config, completion, embedder, index, source, history)
            .context("building the answer pipeline")?;

    let output = synthesizer
        .resolve_and_answer(&question, "demo-user", "en", "default", Some("cli"))
        .await;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
