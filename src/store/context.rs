//! Prompt-augmentation helpers over the knowledge store.
//!
//! Other features hand a free-text question here and get back either the
//! question untouched or the question prefixed with matching knowledge
//! entries. Store failures degrade to "no context" rather than surfacing.

use chrono::SecondsFormat;
use tracing::warn;

use crate::store::knowledge::KnowledgeStore;

const KNOWLEDGE_PREAMBLE: &str = "Use the knowledge entries below when relevant. If they do not resolve the prompt, explain what additional information is needed before answering.";

const CONTENT_PREVIEW_CHARS: usize = 280;

/// Render matching knowledge entries as a numbered context block. Queries
/// shorter than three characters return nothing, as does any search failure.
pub fn knowledge_context(
    store: &KnowledgeStore,
    guild_id: &str,
    query: &str,
    limit: u32,
) -> String {
    if guild_id.is_empty() || query.chars().count() < 3 {
        return String::new();
    }
    let entries = match store.search(guild_id, query, limit) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Knowledge search failed: {}", e);
            return String::new();
        }
    };
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let when = entry.created_at.to_rfc3339_opts(SecondsFormat::Secs, true);
            let title = entry.title.as_deref().unwrap_or("Untitled");
            let body: String = match entry.summary.as_deref().filter(|s| !s.is_empty()) {
                Some(summary) => summary.to_string(),
                None => entry.content.chars().take(CONTENT_PREVIEW_CHARS).collect(),
            };
            format!("Entry {} ({}) - {}\n{}", idx + 1, when, title, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prefix `base_prompt` with knowledge context when any is found. The search
/// uses `search_text` when given, otherwise the prompt itself.
pub fn augment_prompt(
    store: &KnowledgeStore,
    guild_id: &str,
    base_prompt: &str,
    search_text: Option<&str>,
    limit: u32,
) -> String {
    let query = search_text.unwrap_or(base_prompt);
    let knowledge = knowledge_context(store, guild_id, query, limit);
    if knowledge.is_empty() {
        return base_prompt.to_string();
    }
    format!(
        "{KNOWLEDGE_PREAMBLE}\n\nKnowledge entries:\n{knowledge}\n\nUser question/context:\n{base_prompt}"
    )
}
