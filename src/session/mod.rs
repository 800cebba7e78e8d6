//! Recording session management
//!
//! This module provides the session lifecycle around one voice room:
//! - Active-session registry (one session per guild, claim-based stop)
//! - Room-event supervision and per-speaker capture fan-out
//! - Stop pipeline: drain, transcribe, summarize, persist, cleanup

pub mod manager;
pub mod registry;

pub use manager::{SessionManager, SessionOutcome, StartOptions, StopOptions, AUTO_STOP_REASON};
pub use registry::{ActiveSession, SessionRegistry};
