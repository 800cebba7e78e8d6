pub mod audio;
pub mod config;
pub mod engines;
pub mod error;
pub mod http;
pub mod session;
pub mod store;
pub mod transport;

pub use audio::{
    encode_wav, run_utterance, AudioDecoder, PcmFormat, RawPcmDecoder, SpeakerBuffer,
    SymphoniaFrameDecoder,
};
pub use config::Config;
pub use engines::{
    combine_fragments, ChatEngine, OpenAiChat, OpenAiTranscription, SessionSummary, Summarizer,
    TranscriptFragment, TranscriptionEngine,
};
pub use error::{DecodeError, EngineError, SessionError, TransportError};
pub use http::{create_router, AppState};
pub use session::{SessionManager, SessionOutcome, SessionRegistry, StartOptions, StopOptions};
pub use store::{augment_prompt, knowledge_context, KnowledgeStore, SessionRow, SnippetRow};
pub use transport::{
    LocalTransport, MemberDirectory, NullDirectory, Occupant, RoomEvent, RoomSubscription,
    StaticDirectory, VoiceTransport,
};
