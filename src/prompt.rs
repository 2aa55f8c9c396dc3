//! Prompt assembly: one Tera template per branch, plus the tone policy.
//!
//! The templates carry the hard constraints (first-person voice, no
//! meta-commentary, no facts beyond the provided context, media links in
//! order) as literal instructions. The tone policy is content selection, not
//! style hope: each entity gets an explicit wording block chosen by comparing
//! its total power against the persona's own.

use serde::Serialize;
use tera::Tera;

use crate::config::{HistoryConfig, PersonaConfig};
use crate::error::CoreError;
use crate::types::{Branch, ContextBundle, ConversationTurn, EntityProfile, Query};

// ---------------------------------------------------------------------------
// Constraints and templates
// ---------------------------------------------------------------------------

const PROMPT_CONSTRAINTS: &str = "\
Hard rules, no exceptions:\n\
- Speak strictly in the first person, as yourself. Never refer to yourself \
in the third person.\n\
- No meta-commentary: never mention prompts, context, databases, searches \
or that you are an AI.\n\
- State only facts present in the provided material. If it is not written \
here, you do not know it.\n\
- Where image links are listed for a character, reproduce them immediately \
after your commentary on that character, in the exact order given, one per \
line, unmodified.";

const SELF_IDENTITY_TEMPLATE: &str = "\
{{ persona_style }}\n\n\
You are {{ persona_name }}. The user is asking who you are.\n\
{{ constraints }}\n\n\
{% if history %}Recent conversation:\n{% for turn in history %}{{ turn.role }}: {{ turn.text }}\n{% endfor %}\n{% endif %}\
What you may say about yourself:\n{{ entities[0].summary }}\n\n\
{{ entities[0].tone_instruction }}\n\
{% if entities[0].media_links %}After your introduction, output these links in this exact order, one per line:\n\
{% for link in entities[0].media_links %}{{ link }}\n{% endfor %}{% endif %}\n\
The user asked: {{ query }}\n\
Introduce yourself on your own terms, briefly and in character.";

const PROFILE_ANSWER_TEMPLATE: &str = "\
{{ persona_style }}\n\n\
You are {{ persona_name }}. Answer in the first person as {{ persona_name }}.\n\
{{ constraints }}\n\n\
{% if history %}Recent conversation:\n{% for turn in history %}{{ turn.role }}: {{ turn.text }}\n{% endfor %}\n{% endif %}\
The user asked: {{ query }}\n\n\
Comment on the following, in this order:\n\
{% for entity in entities %}--- {{ entity.name }} ---\n\
{{ entity.summary }}\n\
{{ entity.tone_instruction }}\n\
{% if entity.media_links %}After your commentary on {{ entity.name }}, output these links in this exact order, one per line:\n\
{% for link in entity.media_links %}{{ link }}\n{% endfor %}{% endif %}\n\
{% endfor %}\
Ground every claim in the material above.";

const NOT_FOUND_TEMPLATE: &str = "\
{{ persona_style }}\n\n\
You are {{ persona_name }}. Answer in the first person as {{ persona_name }}.\n\
{{ constraints }}\n\n\
The user asked: {{ query }}\n\n\
You have never heard of: {% for name in unresolved %}{{ name }}{% if not loop.last %}, {% endif %}{% endfor %}.\n\
Say so curtly and with visible impatience. Do not invent a single detail \
about them.\n\
{% if entities %}You do know the following; cover them as usual:\n\
{% for entity in entities %}--- {{ entity.name }} ---\n\
{{ entity.summary }}\n\
{{ entity.tone_instruction }}\n\
{% if entity.media_links %}After your commentary on {{ entity.name }}, output these links in this exact order, one per line:\n\
{% for link in entity.media_links %}{{ link }}\n{% endfor %}{% endif %}\n\
{% endfor %}{% endif %}";

const SEMANTIC_ENTITY_TEMPLATE: &str = "\
{{ persona_style }}\n\n\
You are {{ persona_name }}. Answer in the first person as {{ persona_name }}.\n\
{{ constraints }}\n\n\
{% if history %}Recent conversation:\n{% for turn in history %}{{ turn.role }}: {{ turn.text }}\n{% endfor %}\n{% endif %}\
The user asked: {{ query }}\n\n\
The question names nobody directly, but it concerns these characters, most \
relevant first:\n\
{% for entity in entities %}--- {{ entity.name }} ---\n\
{{ entity.summary }}\n\
{{ entity.tone_instruction }}\n\
{% if entity.media_links %}After your commentary on {{ entity.name }}, output these links in this exact order, one per line:\n\
{% for link in entity.media_links %}{{ link }}\n{% endfor %}{% endif %}\n\
{% endfor %}\
Answer the question through them, grounded in the material above.";

const DOCUMENT_RAG_TEMPLATE: &str = "\
{{ persona_style }}\n\n\
You are {{ persona_name }}. Answer in the first person as {{ persona_name }}.\n\
{{ constraints }}\n\n\
{% if history %}Recent conversation:\n{% for turn in history %}{{ turn.role }}: {{ turn.text }}\n{% endfor %}\n{% endif %}\
The user asked: {{ query }}\n\n\
Relevant source material, most relevant first:\n\
{% for doc in documents %}[{{ doc.record_ref }}]\n{{ doc.excerpt }}\n\n{% endfor %}\
Answer strictly from this material, in your own voice.";

const NO_CONTEXT_TEMPLATE: &str = "\
{{ persona_style }}\n\n\
You are {{ persona_name }}. Answer in the first person as {{ persona_name }}.\n\
{{ constraints }}\n\n\
The user asked: {{ query }}\n\n\
You have nothing on this subject. Say so plainly, in character, without \
guessing and without apologizing more than once.";

// ---------------------------------------------------------------------------
// Template views
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EntityView {
    name: String,
    summary: String,
    tone_instruction: String,
    media_links: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TurnView {
    role: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct DocumentView {
    record_ref: String,
    excerpt: String,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Renders the branch-selected prompt for one request.
pub struct PersonaPromptBuilder {
    tera: Tera,
    persona: PersonaConfig,
    tail_turns: usize,
}

impl PersonaPromptBuilder {
    pub fn new(persona: PersonaConfig, history: &HistoryConfig) -> Result<Self, CoreError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            (Branch::SelfIdentity.template_name(), SELF_IDENTITY_TEMPLATE),
            (Branch::ProfileAnswer.template_name(), PROFILE_ANSWER_TEMPLATE),
            (Branch::NotFound.template_name(), NOT_FOUND_TEMPLATE),
            (
                Branch::SemanticEntityAnswer.template_name(),
                SEMANTIC_ENTITY_TEMPLATE,
            ),
            (Branch::DocumentRag.template_name(), DOCUMENT_RAG_TEMPLATE),
            (Branch::NoContextFound.template_name(), NO_CONTEXT_TEMPLATE),
        ])
        .map_err(|e| CoreError::Template(e.to_string()))?;

        Ok(Self {
            tera,
            persona,
            tail_turns: history.tail_turns,
        })
    }

    /// Render the prompt for `bundle.branch`.
    pub fn build(
        &self,
        bundle: &ContextBundle,
        query: &Query,
        history: &[ConversationTurn],
    ) -> Result<String, CoreError> {
        let mut context = tera::Context::new();
        context.insert("persona_name", &self.persona.self_name);
        context.insert("persona_style", &self.persona.style);
        context.insert("constraints", PROMPT_CONSTRAINTS);
        context.insert("query", &query.text);
        context.insert("entities", &self.entity_views(bundle, &query.text));
        context.insert("unresolved", &bundle.unresolved_names);
        context.insert(
            "documents",
            &bundle
                .document_matches
                .iter()
                .map(|m| DocumentView {
                    record_ref: m.record_ref.clone(),
                    excerpt: m.excerpt.clone(),
                })
                .collect::<Vec<_>>(),
        );
        context.insert("history", &self.history_tail(history));

        self.tera
            .render(bundle.branch.template_name(), &context)
            .map_err(|e| CoreError::Template(e.to_string()))
    }

    fn entity_views(&self, bundle: &ContextBundle, query_text: &str) -> Vec<EntityView> {
        let mut profiles: Vec<&EntityProfile> = bundle.resolved_profiles.iter().collect();
        if query_implies_comparison(query_text) {
            profiles.sort_by(|a, b| {
                b.power_metrics
                    .total()
                    .partial_cmp(&a.power_metrics.total())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        profiles
            .into_iter()
            .map(|profile| EntityView {
                name: profile.canonical_name.clone(),
                summary: self.profile_summary(profile, bundle),
                tone_instruction: self.tone_instruction(profile),
                media_links: profile.media_links.clone(),
            })
            .collect()
    }

    /// Structured facts block for one profile: attributes, power scores and
    /// equipment, nothing the model has to guess at.
    fn profile_summary(&self, profile: &EntityProfile, bundle: &ContextBundle) -> String {
        let mut lines = Vec::new();
        for (key, value) in &profile.attributes {
            lines.push(format!("{}: {}", key, value));
        }
        let p = &profile.power_metrics;
        lines.push(format!(
            "power: physical {:.0}, magic {:.0}, utility {:.0} (total {:.0})",
            p.physical,
            p.magic,
            p.utility,
            p.total()
        ));
        if let Some(item) = bundle.equipment.get(&profile.canonical_name) {
            lines.push(format!(
                "equipment: {} (damage {:.0} + {:.0})",
                item.name, item.base_damage, item.bonus_damage
            ));
        }
        lines.join("\n")
    }

    /// Pick the wording block by comparing total power with the persona's.
    fn tone_instruction(&self, profile: &EntityProfile) -> String {
        if profile.canonical_name.eq_ignore_ascii_case(&self.persona.self_name) {
            return "Tone: speak of yourself with complete, unapologetic confidence.".to_string();
        }
        let own = self.persona.power_metrics.total();
        let theirs = profile.power_metrics.total();
        if theirs > own {
            format!(
                "Tone: {} outclasses you. Speak of them with grudging respect; \
                 do not pretend otherwise.",
                profile.canonical_name
            )
        } else if theirs < own {
            format!(
                "Tone: {} is beneath you. Be dismissive; they are barely worth \
                 your commentary.",
                profile.canonical_name
            )
        } else {
            format!(
                "Tone: {} is your equal. Speak of them as a peer, without \
                 deference or contempt.",
                profile.canonical_name
            )
        }
    }

    fn history_tail(&self, history: &[ConversationTurn]) -> Vec<TurnView> {
        let skip = history.len().saturating_sub(self.tail_turns);
        history[skip..]
            .iter()
            .map(|turn| TurnView {
                role: turn.role.as_str(),
                text: turn.text.clone(),
            })
            .collect()
    }
}

/// Heuristic for "rank these by strength" phrasing; such queries present
/// entities strongest first.
fn query_implies_comparison(query_text: &str) -> bool {
    let lowered = query_text.to_lowercase();
    ["compare", "stronger", "strongest", " vs ", "versus", "who would win", "比較"]
        .iter()
        .any(|marker| lowered.contains(marker))
}
