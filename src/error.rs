//! Error types for the capture, engine, and session layers.
//!
//! Failures below the session level (decode, transcription, summarization)
//! are logged and degrade the result; only start/stop rejections and storage
//! failures on the start path surface as errors to callers.

use thiserror::Error;

/// Errors surfaced by [`SessionManager`](crate::session::SessionManager)
/// start/stop calls.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A session is already open for this guild; starts are rejected, not queued.
    #[error("a voice session is already active for guild {guild_id}")]
    AlreadyActive { guild_id: String },

    /// Stop was requested but no session is open for this guild.
    #[error("no active voice session for guild {guild_id}")]
    NoActiveSession { guild_id: String },

    /// The requested channel does not exist or is not an audio-capable room.
    #[error("channel {channel_id} is not a recordable voice room")]
    InvalidTarget { channel_id: String },

    #[error("voice transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("knowledge store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("scratch storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a voice transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} does not carry audio")]
    NotAudioRoom(String),

    #[error("transport failure: {0}")]
    Other(String),
}

/// Per-utterance audio decode failures. These never abort a session; the
/// affected speaker's buffer is left empty or partial.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("audio decode failed: {0}")]
    Codec(#[from] symphonia::core::errors::Error),

    #[error("frame is not whole 16-bit samples ({0} bytes)")]
    TruncatedFrame(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures from the transcription and summarization engine clients.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("engine request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("engine returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed engine response: {0}")]
    InvalidResponse(String),
}
