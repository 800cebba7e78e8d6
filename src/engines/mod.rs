//! External engine clients: transcription and summarization.

pub mod summarize;
pub mod transcribe;

pub use summarize::{
    combine_fragments, ChatEngine, OpenAiChat, SessionSummary, Summarizer, SummaryContext,
};
pub use transcribe::{
    transcribe_buffers, OpenAiTranscription, TranscriptFragment, TranscriptionEngine,
};
