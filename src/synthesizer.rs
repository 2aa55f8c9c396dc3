//! End-to-end orchestration: one query in, one [`AnswerOutput`] out.
//!
//! The synthesizer owns the happy path (extract, route, prompt, generate,
//! translate, record) and the failure policy: everything recoverable is
//! recovered where it happens, and the only failure the caller ever sees is
//! a failed generation, reported as `success: false` with a degraded
//! in-character apology rather than an error.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::CoreError;
use crate::extractor::NameExtractor;
use crate::history::HistoryStore;
use crate::index::VectorSearcher;
use crate::prompt::PersonaPromptBuilder;
use crate::providers::{CompletionOptions, CompletionProvider, EmbeddingProvider};
use crate::resolver::{ProfileResolver, ProfileSource};
use crate::router::Router;
use crate::types::{AnswerOutput, Branch, ContextBundle, ConversationTurn, Query};

/// The full answer pipeline, wired once at startup.
pub struct AnswerSynthesizer {
    config: AppConfig,
    extractor: NameExtractor,
    router: Router,
    prompt_builder: PersonaPromptBuilder,
    completion: Arc<dyn CompletionProvider>,
    history: Arc<dyn HistoryStore>,
}

impl AnswerSynthesizer {
    pub fn new(
        config: AppConfig,
        completion: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorSearcher>,
        profile_source: Arc<dyn ProfileSource>,
        history: Arc<dyn HistoryStore>,
    ) -> Result<Self, CoreError> {
        let resolver = Arc::new(ProfileResolver::new(
            profile_source,
            config.profile_cache.clone(),
        ));
        let router = Router::new(
            config.persona.clone(),
            config.retrieval.clone(),
            resolver,
            embedder,
            index,
        );
        let prompt_builder = PersonaPromptBuilder::new(config.persona.clone(), &config.history)?;

        Ok(Self {
            extractor: NameExtractor::new(completion.clone()),
            router,
            prompt_builder,
            completion,
            history,
            config,
        })
    }

    /// Convenience entry point mirroring the raw request fields.
    pub async fn resolve_and_answer(
        &self,
        text: &str,
        user_id: &str,
        language: &str,
        persona_id: &str,
        frontend_source: Option<&str>,
    ) -> AnswerOutput {
        let mut query = Query::new(text, user_id, language, persona_id);
        if let Some(source) = frontend_source {
            query = query.with_frontend_source(source);
        }
        self.answer(&query).await
    }

    /// Answer one query. Never returns an error; see the module docs for the
    /// failure policy.
    pub async fn answer(&self, query: &Query) -> AnswerOutput {
        if query.text.trim().is_empty() {
            return AnswerOutput {
                success: false,
                text: "Ask an actual question.".to_string(),
                branch: Branch::NoContextFound,
                matched_entities: Vec::new(),
                source_summary: Default::default(),
                error_kind: Some(CoreError::InvalidQuery.kind().to_string()),
            };
        }

        let request_id = uuid::Uuid::new_v4();
        let names = self
            .extractor
            .extract(&query.text, &self.config.persona.self_name)
            .await;
        let bundle = self.router.route(query, &names).await;
        tracing::info!(
            %request_id,
            branch = ?bundle.branch,
            user = %query.user_id,
            "query routed"
        );

        let history_tail = match self
            .history
            .read(&query.user_id, self.config.history.tail_turns)
            .await
        {
            Ok(tail) => tail,
            Err(e) => {
                log::warn!("history read failed, answering without context: {}", e);
                Vec::new()
            }
        };

        let prompt = match self.prompt_builder.build(&bundle, query, &history_tail) {
            Ok(prompt) => prompt,
            Err(e) => return self.degraded(&bundle, &e),
        };

        let text = match self.generate_with_retries(&prompt).await {
            Ok(text) => text,
            Err(e) => return self.degraded(&bundle, &e),
        };
        let text = self.maybe_translate(text, &query.language).await;

        self.record_exchange(query, &text).await;

        AnswerOutput {
            success: true,
            text,
            branch: bundle.branch,
            matched_entities: bundle.matched_entities(),
            source_summary: bundle.summary(),
            error_kind: None,
        }
    }

    async fn generate_with_retries(&self, prompt: &str) -> Result<String, CoreError> {
        let options = CompletionOptions {
            temperature: self.config.completion.temperature,
            max_tokens: None,
        };
        let attempts = self.config.completion.max_retries + 1;
        let mut last_error = CoreError::GenerationFailed("no attempts made".to_string());
        for attempt in 1..=attempts {
            match self.completion.complete(prompt, &options).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    log::warn!("generation attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// Translate the answer into the query language when it differs from the
    /// persona's native one. Translation failure keeps the original text.
    async fn maybe_translate(&self, text: String, language: &str) -> String {
        if language.eq_ignore_ascii_case(&self.config.persona.native_language) {
            return text;
        }
        let prompt = format!(
            "Translate the following reply into {}. Preserve the first-person \
             voice and the speaker's tone exactly. Output only the \
             translation.\n\n{}",
            language, text
        );
        let options = CompletionOptions {
            temperature: 0.2,
            max_tokens: None,
        };
        match self.completion.complete(&prompt, &options).await {
            Ok(translated) => translated,
            Err(e) => {
                log::warn!("translation to {} failed, keeping original: {}", language, e);
                text
            }
        }
    }

    /// Best-effort history write; a failed append never affects the answer.
    async fn record_exchange(&self, query: &Query, answer: &str) {
        let turns = [
            ConversationTurn::user(query.text.clone()),
            ConversationTurn::assistant(answer.to_string()),
        ];
        for turn in turns {
            if let Err(e) = self.history.append(&query.user_id, turn).await {
                log::warn!("history append failed for {}: {}", query.user_id, e);
            }
        }
    }

    fn degraded(&self, bundle: &ContextBundle, error: &CoreError) -> AnswerOutput {
        tracing::error!("answer pipeline degraded: {}", error);
        AnswerOutput {
            success: false,
            text: "I cannot give you a proper answer right now. Ask me again \
                   in a moment."
                .to_string(),
            branch: bundle.branch,
            matched_entities: bundle.matched_entities(),
            source_summary: bundle.summary(),
            error_kind: Some(error.kind().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::config::PersonaConfig;
    use crate::extractor::EXTRACTION_FORMAT_HINT;
    use crate::history::InMemoryHistoryStore;
    use crate::index::InMemoryVectorIndex;
    use crate::resolver::InMemoryProfileSource;
    use crate::types::{CollectionTag, EntityProfile, EquipmentRecord, PowerMetrics};

    // -----------------------------------------------------------------------
    // Stubs
    // -----------------------------------------------------------------------

    /// Scripted completion provider. Distinguishes the three call sites by
    /// their prompt markers.
    struct StubCompletion {
        extraction_reply: String,
        answer_reply: String,
        translation_reply: Option<String>,
        failing_answer_calls: usize,
        answer_calls: AtomicUsize,
    }

    impl StubCompletion {
        fn new(extraction_reply: &str, answer_reply: &str) -> Self {
            Self {
                extraction_reply: extraction_reply.to_string(),
                answer_reply: answer_reply.to_string(),
                translation_reply: None,
                failing_answer_calls: 0,
                answer_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for StubCompletion {
        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<String, CoreError> {
            if prompt.contains(EXTRACTION_FORMAT_HINT) {
                return Ok(self.extraction_reply.clone());
            }
            if prompt.starts_with("Translate the following reply") {
                return match &self.translation_reply {
                    Some(reply) => Ok(reply.clone()),
                    None => Err(CoreError::GenerationFailed("no translator".to_string())),
                };
            }
            let call = self.answer_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failing_answer_calls {
                return Err(CoreError::GenerationFailed("flaky".to_string()));
            }
            Ok(self.answer_reply.clone())
        }
    }

    /// Two-topic embedder matching the seeded index rows below.
    struct TopicEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TopicEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
            const WIND: &[&str] = &["sorane", "wind", "dancer", "floating", "city"];
            const JAVA: &[&str] = &["java", "bytecode", "jvm", "compile", "programs"];
            let mut vector = vec![0.0f32; 2];
            for token in text.to_lowercase().split_whitespace() {
                let token = token.trim_matches(|c: char| !c.is_alphanumeric());
                if WIND.contains(&token) {
                    vector[0] += 1.0;
                }
                if JAVA.contains(&token) {
                    vector[1] += 1.0;
                }
            }
            Ok(vector)
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
            Err(CoreError::EmbeddingUnavailable("down".to_string()))
        }
    }

    // -----------------------------------------------------------------------
    // Wiring
    // -----------------------------------------------------------------------

    fn sorane() -> EntityProfile {
        EntityProfile::new("Sorane")
            .with_alias("Sky Maiden")
            .with_attribute("profession", "wind dancer")
            .with_power(PowerMetrics::new(300.0, 500.0, 100.0))
            .with_media_link("https://host/Sorane.png")
    }

    async fn synthesizer(
        completion: StubCompletion,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> AnswerSynthesizer {
        let index = InMemoryVectorIndex::new();
        let seed = TopicEmbedder;
        let entity_text = "Sorane the wind dancer of the floating city";
        index.insert_entity("Sorane", seed.embed(entity_text).await.unwrap(), entity_text);
        let doc_text = "Java programs compile to bytecode that runs on the JVM";
        index.upsert(
            CollectionTag::Documents,
            "doc-java",
            seed.embed(doc_text).await.unwrap(),
            doc_text,
        );

        let source = InMemoryProfileSource::new(
            vec![sorane()],
            vec![EquipmentRecord::new("Sorane", "Gale Fans").with_damage(120.0, 30.0)],
        );
        let config = AppConfig {
            persona: PersonaConfig::default(),
            ..AppConfig::default()
        };
        let history = Arc::new(InMemoryHistoryStore::new(&config.history));

        AnswerSynthesizer::new(
            config,
            Arc::new(completion),
            embedder,
            Arc::new(index),
            Arc::new(source),
            history,
        )
        .unwrap()
    }

    fn query(text: &str) -> Query {
        Query::new(text, "u1", "en", "default")
    }

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_known_name_answers_from_profile() {
        let s = synthesizer(
            StubCompletion::new("Sorane", "Sorane again. Fine."),
            Arc::new(TopicEmbedder),
        )
        .await;

        let output = s.answer(&query("Who is Sorane?")).await;
        assert!(output.success);
        assert_eq!(output.branch, Branch::ProfileAnswer);
        assert_eq!(output.matched_entities, vec!["Sorane"]);
        assert_eq!(output.text, "Sorane again. Fine.");
        assert!(output.error_kind.is_none());
    }

    #[tokio::test]
    async fn test_document_question_uses_rag_branch() {
        let s = synthesizer(
            StubCompletion::new("", "Bytecode, since you ask."),
            Arc::new(TopicEmbedder),
        )
        .await;

        let output = s
            .answer(&query("how do programs compile to bytecode on the jvm"))
            .await;
        assert!(output.success);
        assert_eq!(output.branch, Branch::DocumentRag);
        assert_eq!(output.source_summary.documents, vec!["doc-java"]);
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found_yet_successful() {
        let s = synthesizer(
            StubCompletion::new("Zyx", "Never heard of them."),
            Arc::new(TopicEmbedder),
        )
        .await;

        let output = s.answer(&query("Who is Zyx?")).await;
        assert!(output.success);
        assert_eq!(output.branch, Branch::NotFound);
        assert_eq!(output.source_summary.unresolved, vec!["Zyx"]);
    }

    #[tokio::test]
    async fn test_embedding_outage_degrades_to_no_context() {
        let s = synthesizer(
            StubCompletion::new("", "Nothing comes to mind."),
            Arc::new(FailingEmbedder),
        )
        .await;

        let output = s.answer(&query("what lies beyond the edge of the map")).await;
        assert!(output.success);
        assert_eq!(output.branch, Branch::NoContextFound);
    }

    #[tokio::test]
    async fn test_identity_question_is_self_identity() {
        let s = synthesizer(
            StubCompletion::new("ignored", "I am Maya. Obviously."),
            Arc::new(TopicEmbedder),
        )
        .await;

        let output = s.answer(&query("Who are you?")).await;
        assert!(output.success);
        assert_eq!(output.branch, Branch::SelfIdentity);
        assert_eq!(output.matched_entities, vec!["Maya"]);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_up_front() {
        let s = synthesizer(
            StubCompletion::new("", "unused"),
            Arc::new(TopicEmbedder),
        )
        .await;

        let output = s.answer(&query("   ")).await;
        assert!(!output.success);
        assert_eq!(output.error_kind.as_deref(), Some("invalid_query"));
    }

    #[tokio::test]
    async fn test_generation_failure_yields_degraded_apology() {
        let mut completion = StubCompletion::new("Sorane", "unreachable");
        completion.failing_answer_calls = 10; // more than 1 + max_retries
        let s = synthesizer(completion, Arc::new(TopicEmbedder)).await;

        let output = s.answer(&query("Who is Sorane?")).await;
        assert!(!output.success);
        assert_eq!(output.error_kind.as_deref(), Some("generation_failed"));
        assert_eq!(output.branch, Branch::ProfileAnswer);
        assert!(!output.text.is_empty());
    }

    #[tokio::test]
    async fn test_one_flaky_attempt_is_retried() {
        let mut completion = StubCompletion::new("Sorane", "Recovered.");
        completion.failing_answer_calls = 1; // default max_retries is 1
        let s = synthesizer(completion, Arc::new(TopicEmbedder)).await;

        let output = s.answer(&query("Who is Sorane?")).await;
        assert!(output.success);
        assert_eq!(output.text, "Recovered.");
    }

    #[tokio::test]
    async fn test_foreign_language_answer_is_translated() {
        let mut completion = StubCompletion::new("Sorane", "Sorane. A wind dancer.");
        completion.translation_reply = Some("索拉音。一位風之舞者。".to_string());
        let s = synthesizer(completion, Arc::new(TopicEmbedder)).await;

        let output = s
            .resolve_and_answer("Who is Sorane?", "u1", "zh-TW", "default", None)
            .await;
        assert!(output.success);
        assert_eq!(output.text, "索拉音。一位風之舞者。");
    }

    #[tokio::test]
    async fn test_translation_failure_keeps_original_text() {
        // translation_reply is None, so the translation call errors.
        let s = synthesizer(
            StubCompletion::new("Sorane", "Sorane. A wind dancer."),
            Arc::new(TopicEmbedder),
        )
        .await;

        let output = s
            .resolve_and_answer("Who is Sorane?", "u1", "zh-TW", "default", None)
            .await;
        assert!(output.success);
        assert_eq!(output.text, "Sorane. A wind dancer.");
    }

    #[tokio::test]
    async fn test_exchange_is_recorded_in_history() {
        let s = synthesizer(
            StubCompletion::new("Sorane", "Sorane again."),
            Arc::new(TopicEmbedder),
        )
        .await;

        s.answer(&query("Who is Sorane?")).await;
        let turns = s.history.read("u1", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text, "Who is Sorane?");
        assert_eq!(turns[1].text, "Sorane again.");
    }
}
