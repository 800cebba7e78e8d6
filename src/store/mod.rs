//! Durable storage: session records, participant timelines, deliveries,
//! and the searchable knowledge index.

pub mod context;
pub mod knowledge;

pub use context::{augment_prompt, knowledge_context};
pub use knowledge::{
    DeliveryRow, KnowledgeStore, ParticipantRow, SessionRow, SnippetRow, SOURCE_VOICE_SESSION,
};
