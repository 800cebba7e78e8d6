//! Registry of active sessions, keyed by guild.
//!
//! The registry is the single shared mutable record of "which guild is
//! recording right now". Stop sequences claim an entry by removing it, so
//! exactly one caller (explicit stop or auto-stop) ever tears a session
//! down; everyone else sees no active session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::audio::SpeakerBuffer;
use crate::store::SessionRow;

/// Per-speaker capture state for one active session. Buffers keep their
/// first-utterance insertion order; handles cover every in-flight utterance
/// task and are joined on drain.
#[derive(Default)]
pub(crate) struct CaptureState {
    pub buffers: Vec<SpeakerBuffer>,
    pub handles: Vec<JoinHandle<()>>,
}

impl CaptureState {
    /// Backing PCM path for a speaker, creating the buffer entry on first
    /// use. Files are named by insertion index, not user id.
    pub fn buffer_path_for(&mut self, user_id: &str, scratch: &Path) -> PathBuf {
        if let Some(buffer) = self.buffers.iter().find(|b| b.user_id == user_id) {
            return buffer.pcm_path.clone();
        }
        let path = scratch.join(format!("speaker-{:02}.pcm", self.buffers.len()));
        self.buffers.push(SpeakerBuffer {
            user_id: user_id.to_string(),
            pcm_path: path.clone(),
        });
        path
    }
}

/// One live recording session: its open row, scratch directory, capture
/// state, and the room-event loop task handle.
pub struct ActiveSession {
    /// Session row as created at start. The closed row comes back from the
    /// store at stop time.
    pub session: SessionRow,
    scratch_path: PathBuf,
    pub(crate) capture: Mutex<CaptureState>,
    pub(crate) room_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) scratch: Mutex<Option<TempDir>>,
}

impl ActiveSession {
    pub(crate) fn new(session: SessionRow, scratch: TempDir) -> Self {
        Self {
            session,
            scratch_path: scratch.path().to_path_buf(),
            capture: Mutex::new(CaptureState::default()),
            room_task: Mutex::new(None),
            scratch: Mutex::new(Some(scratch)),
        }
    }

    pub fn scratch_path(&self) -> &Path {
        &self.scratch_path
    }
}

/// Guild-keyed map of active sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<ActiveSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, guild_id: &str) -> bool {
        self.sessions.lock().await.contains_key(guild_id)
    }

    pub async fn get(&self, guild_id: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.lock().await.get(guild_id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub(crate) async fn insert(&self, guild_id: &str, active: Arc<ActiveSession>) {
        self.sessions
            .lock()
            .await
            .insert(guild_id.to_string(), active);
    }

    /// Remove and return the active session. The caller that gets `Some`
    /// owns the stop sequence.
    pub(crate) async fn claim(&self, guild_id: &str) -> Option<Arc<ActiveSession>> {
        self.sessions.lock().await.remove(guild_id)
    }
}
