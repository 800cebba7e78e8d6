//! Session lifecycle: start, room-event supervision, stop-and-persist.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::audio::{run_utterance, AudioDecoder, PcmFormat};
use crate::config::Config;
use crate::engines::{
    transcribe_buffers, ChatEngine, Summarizer, SummaryContext, TranscriptFragment,
    TranscriptionEngine,
};
use crate::error::{SessionError, TransportError};
use crate::session::registry::{ActiveSession, SessionRegistry};
use crate::store::{KnowledgeStore, SessionRow, SOURCE_VOICE_SESSION};
use crate::transport::{MemberDirectory, RoomEvent, VoiceTransport};

/// Close reason recorded when the room empties of non-automated occupants.
pub const AUTO_STOP_REASON: &str = "room-empty";

const DEFAULT_STOP_REASON: &str = "manual";

/// Options for starting a session.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub initiator_id: Option<String>,
    pub topic: Option<String>,
}

/// Options for stopping a session. A missing reason is recorded as `manual`.
#[derive(Debug, Clone, Default)]
pub struct StopOptions {
    pub ended_by: Option<String>,
    pub reason: Option<String>,
}

/// Final artifacts of a stopped session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionOutcome {
    pub session: SessionRow,
    pub fragments: Vec<TranscriptFragment>,
    pub summary: Option<String>,
    pub transcript: String,
    /// Set when persisting the closed session, sweeping participants, or
    /// indexing the snippet failed. The scratch directory is released
    /// regardless.
    pub persist_error: Option<String>,
}

/// Coordinates recording sessions across guilds: one active session per
/// guild, per-speaker capture fan-out, and the fan-in stop pipeline of
/// drain, transcribe, summarize, persist, and cleanup.
pub struct SessionManager {
    /// Guild-keyed active-session registry, owned by the host application.
    registry: Arc<SessionRegistry>,

    /// Durable storage for sessions, participants, and snippets.
    store: Arc<KnowledgeStore>,

    /// Voice room boundary: join/leave and room events.
    transport: Arc<dyn VoiceTransport>,

    /// Display-name resolution for transcript labels.
    directory: Arc<dyn MemberDirectory>,

    /// Frame decoder shared by all capture pipelines.
    decoder: Arc<dyn AudioDecoder>,

    /// Transcription engine for finished speaker buffers.
    transcriber: Arc<dyn TranscriptionEngine>,

    /// Summary generation over the combined transcript.
    summarizer: Summarizer,

    format: PcmFormat,
    silence_timeout: Duration,
    drain_timeout: Duration,
    min_buffer_bytes: u64,
    scratch_dir: Option<PathBuf>,

    /// Serializes start attempts so racing starts cannot both pass the
    /// registry check.
    start_gate: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        registry: Arc<SessionRegistry>,
        store: Arc<KnowledgeStore>,
        transport: Arc<dyn VoiceTransport>,
        directory: Arc<dyn MemberDirectory>,
        decoder: Arc<dyn AudioDecoder>,
        transcriber: Arc<dyn TranscriptionEngine>,
        chat: Arc<dyn ChatEngine>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            directory,
            decoder,
            transcriber,
            summarizer: Summarizer::new(chat),
            format: config.audio.format(),
            silence_timeout: Duration::from_millis(config.audio.silence_timeout_ms),
            drain_timeout: Duration::from_millis(config.session.drain_timeout_ms),
            min_buffer_bytes: config.transcription.min_buffer_bytes,
            scratch_dir: config.audio.scratch_dir.as_ref().map(PathBuf::from),
            start_gate: Mutex::new(()),
        }
    }

    /// Start recording in a room. Rejected with `AlreadyActive` when the
    /// guild already has a session, `InvalidTarget` when the room is missing
    /// or not audio-capable.
    pub async fn start_session(
        self: &Arc<Self>,
        guild_id: &str,
        channel_id: &str,
        opts: StartOptions,
    ) -> Result<SessionRow, SessionError> {
        let _gate = self.start_gate.lock().await;

        if self.registry.contains(guild_id).await {
            return Err(SessionError::AlreadyActive {
                guild_id: guild_id.to_string(),
            });
        }

        let subscription = match self.transport.join(guild_id, channel_id).await {
            Ok(subscription) => subscription,
            Err(TransportError::RoomNotFound(_)) | Err(TransportError::NotAudioRoom(_)) => {
                return Err(SessionError::InvalidTarget {
                    channel_id: channel_id.to_string(),
                });
            }
            Err(e) => return Err(SessionError::Transport(e)),
        };

        let scratch = match self.create_scratch() {
            Ok(scratch) => scratch,
            Err(e) => {
                let _ = self.transport.leave(guild_id).await;
                return Err(SessionError::Io(e));
            }
        };

        let session = match self.store.create_session(
            guild_id,
            channel_id,
            opts.initiator_id.as_deref(),
            opts.topic.as_deref(),
        ) {
            Ok(session) => session,
            Err(e) => {
                let _ = self.transport.leave(guild_id).await;
                return Err(SessionError::Storage(e));
            }
        };

        // Open timeline entries for everyone already in the room.
        let mut present = HashSet::new();
        for occupant in &subscription.occupants {
            if occupant.is_automated {
                continue;
            }
            if present.insert(occupant.user_id.clone()) {
                if let Err(e) = self.store.add_participant(session.id, &occupant.user_id) {
                    warn!(
                        "Failed to record participant join for {}: {}",
                        occupant.user_id, e
                    );
                }
            }
        }

        let active = Arc::new(ActiveSession::new(session.clone(), scratch));

        // Spawn the room-event loop that drives per-speaker capture.
        let manager = Arc::clone(self);
        let loop_active = Arc::clone(&active);
        let loop_guild = guild_id.to_string();
        let room_task = tokio::spawn(async move {
            room_loop(manager, loop_active, subscription.events, present, loop_guild).await;
        });
        {
            let mut handle = active.room_task.lock().await;
            *handle = Some(room_task);
        }

        self.registry.insert(guild_id, Arc::clone(&active)).await;

        info!(
            "Session {} started for guild {} in channel {}",
            session.id, guild_id, channel_id
        );
        Ok(session)
    }

    /// Stop the guild's session: drain captures, transcribe, summarize,
    /// persist, release scratch. A persistence failure degrades the outcome
    /// (`persist_error`) instead of failing the stop.
    pub async fn stop_session(
        &self,
        guild_id: &str,
        opts: StopOptions,
    ) -> Result<SessionOutcome, SessionError> {
        // Claiming the registry entry decides which caller runs the stop
        // sequence; losers see NoActiveSession.
        let active = self.registry.claim(guild_id).await.ok_or_else(|| {
            SessionError::NoActiveSession {
                guild_id: guild_id.to_string(),
            }
        })?;
        let session = active.session.clone();
        info!("Stopping session {} for guild {}", session.id, guild_id);

        if let Err(e) = self.transport.leave(guild_id).await {
            warn!("Transport leave failed for guild {}: {}", guild_id, e);
        }

        // Leaving closed the event stream; once the loop task is joined no
        // new utterance tasks can appear.
        {
            let mut handle = active.room_task.lock().await;
            if let Some(task) = handle.take() {
                if let Err(e) = task.await {
                    error!("Room event task panicked: {}", e);
                }
            }
        }

        // Drain in-flight captures, bounded so a stuck pipeline cannot hang
        // the stop.
        let (buffers, handles) = {
            let mut capture = active.capture.lock().await;
            (
                std::mem::take(&mut capture.buffers),
                std::mem::take(&mut capture.handles),
            )
        };
        if !handles.is_empty() {
            match timeout(self.drain_timeout, join_all(handles)).await {
                Ok(results) => {
                    for result in results {
                        if let Err(e) = result {
                            error!("Capture task panicked: {}", e);
                        }
                    }
                }
                Err(_) => {
                    warn!(
                        "Capture drain timed out for session {}, proceeding with partial audio",
                        session.id
                    );
                }
            }
        }

        let fragments = transcribe_buffers(
            Arc::clone(&self.transcriber),
            Arc::clone(&self.directory),
            guild_id,
            self.format,
            self.min_buffer_bytes,
            &buffers,
        )
        .await;

        let context = SummaryContext {
            topic: session.topic.clone(),
            date: session.started_at,
        };
        let result = self.summarizer.summarize(&fragments, &context).await;

        // Persist: close the session, sweep open participants, index the
        // snippet. Failures are collected, never allowed to skip cleanup.
        let ended_at = Utc::now();
        let mut metadata = session.metadata.clone();
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "reason".to_string(),
                json!(opts.reason.as_deref().unwrap_or(DEFAULT_STOP_REASON)),
            );
            map.insert("ended_by".to_string(), json!(opts.ended_by));
        }
        let mut persist_errors: Vec<String> = Vec::new();

        let closed = match self.store.close_session(
            session.id,
            ended_at,
            result.summary.as_deref(),
            Some(&result.transcript),
            &metadata,
        ) {
            Ok(Some(row)) => Some(row),
            Ok(None) => {
                error!("Session {} missing at close", session.id);
                persist_errors.push(format!("session {} missing at close", session.id));
                None
            }
            Err(e) => {
                error!("Failed to persist closed session {}: {}", session.id, e);
                persist_errors.push(e.to_string());
                None
            }
        };

        if let Err(e) = self.store.close_open_participants(session.id, ended_at) {
            warn!(
                "Failed to close open participants for session {}: {}",
                session.id, e
            );
            persist_errors.push(e.to_string());
        }

        // Snippet indexing happens-after a successful session close.
        if closed.is_some() {
            let title = session
                .topic
                .clone()
                .unwrap_or_else(|| format!("Session {}", session.id));
            let content = if result.transcript.is_empty() {
                result.summary.clone().unwrap_or_default()
            } else {
                result.transcript.clone()
            };
            if let Err(e) = self.store.upsert_snippet(
                &session.guild_id,
                SOURCE_VOICE_SESSION,
                session.id,
                Some(&title),
                result.summary.as_deref(),
                &content,
            ) {
                error!(
                    "Failed to index knowledge snippet for session {}: {}",
                    session.id, e
                );
                persist_errors.push(e.to_string());
            }
        }

        // Release the scratch directory on every path.
        {
            let mut scratch = active.scratch.lock().await;
            if let Some(dir) = scratch.take() {
                if let Err(e) = dir.close() {
                    warn!("Failed to remove scratch directory: {}", e);
                }
            }
        }

        let final_session = match closed {
            Some(row) => row,
            None => {
                // Reflect what should have been stored so the caller still
                // gets the artifacts.
                let mut row = session.clone();
                row.ended_at = Some(ended_at);
                row.summary = result.summary.clone();
                row.transcript = Some(result.transcript.clone());
                row.metadata = metadata;
                row
            }
        };

        info!(
            "Session {} stopped with {} transcript fragment(s)",
            final_session.id,
            fragments.len()
        );

        Ok(SessionOutcome {
            session: final_session,
            fragments,
            summary: result.summary,
            transcript: result.transcript,
            persist_error: if persist_errors.is_empty() {
                None
            } else {
                Some(persist_errors.join("; "))
            },
        })
    }

    /// The guild's active session row, if any.
    pub async fn active_session(&self, guild_id: &str) -> Option<SessionRow> {
        self.registry
            .get(guild_id)
            .await
            .map(|active| active.session.clone())
    }

    pub async fn is_active(&self, guild_id: &str) -> bool {
        self.registry.contains(guild_id).await
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn create_scratch(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("class-scribe-");
        match &self.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
    }

    /// Spawn one utterance capture task for a speaker, creating the
    /// speaker's buffer on first use. Handles of already-finished utterances
    /// are pruned here, so drain only ever joins live tasks plus the tail.
    async fn spawn_utterance(
        &self,
        active: &Arc<ActiveSession>,
        user_id: &str,
        frames: mpsc::Receiver<Vec<u8>>,
    ) {
        let decoder = Arc::clone(&self.decoder);
        let silence_timeout = self.silence_timeout;
        let mut capture = active.capture.lock().await;
        let pcm_path = capture.buffer_path_for(user_id, active.scratch_path());
        let speaker = user_id.to_string();
        let handle = tokio::spawn(async move {
            match run_utterance(decoder, pcm_path, frames, silence_timeout).await {
                Ok(bytes) => debug!("Utterance captured for {}: {} bytes", speaker, bytes),
                Err(e) => warn!("Utterance capture failed for {}: {}", speaker, e),
            }
        });
        capture.handles.retain(|h| !h.is_finished());
        capture.handles.push(handle);
    }
}

/// Drives one session's room events until the stream closes or the room
/// empties. Auto-stop runs on a fresh task so this loop can finish and be
/// joined by the stop sequence.
async fn room_loop(
    manager: Arc<SessionManager>,
    active: Arc<ActiveSession>,
    mut events: mpsc::Receiver<RoomEvent>,
    mut present: HashSet<String>,
    guild_id: String,
) {
    let session_id = active.session.id;
    while let Some(event) = events.recv().await {
        match event {
            RoomEvent::OccupantJoined(occupant) => {
                if occupant.is_automated {
                    continue;
                }
                if present.insert(occupant.user_id.clone()) {
                    if let Err(e) = manager.store.add_participant(session_id, &occupant.user_id) {
                        warn!(
                            "Failed to record participant join for {}: {}",
                            occupant.user_id, e
                        );
                    }
                }
            }
            RoomEvent::OccupantLeft { user_id } => {
                // Untracked leavers (the recorder itself, other bots) never
                // trigger the empty-room check.
                if !present.remove(&user_id) {
                    continue;
                }
                if let Err(e) = manager.store.mark_participant_left(session_id, &user_id) {
                    warn!("Failed to record participant leave for {}: {}", user_id, e);
                }
                if present.is_empty() {
                    info!(
                        "Room empty for guild {}, auto-stopping session {}",
                        guild_id, session_id
                    );
                    let stopper = Arc::clone(&manager);
                    let stop_guild = guild_id.clone();
                    tokio::spawn(async move {
                        let opts = StopOptions {
                            ended_by: None,
                            reason: Some(AUTO_STOP_REASON.to_string()),
                        };
                        match stopper.stop_session(&stop_guild, opts).await {
                            Ok(outcome) => info!(
                                "Session {} auto-stopped after room emptied",
                                outcome.session.id
                            ),
                            // A racing manual stop claimed it first.
                            Err(SessionError::NoActiveSession { .. }) => {}
                            Err(e) => warn!("Auto-stop failed for guild {}: {}", stop_guild, e),
                        }
                    });
                    break;
                }
            }
            RoomEvent::SpeakingStarted { user_id, frames } => {
                if !present.contains(&user_id) {
                    debug!("Ignoring audio from untracked speaker {}", user_id);
                    continue;
                }
                manager.spawn_utterance(&active, &user_id, frames).await;
            }
        }
    }
    debug!("Room event loop ended for session {}", session_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use crate::audio::RawPcmDecoder;
    use crate::error::EngineError;
    use crate::transport::{LocalTransport, NullDirectory};

    struct SilentTranscription;

    #[async_trait]
    impl TranscriptionEngine for SilentTranscription {
        async fn transcribe(&self, _wav: Vec<u8>) -> Result<String, EngineError> {
            Ok(String::new())
        }
    }

    struct SilentChat;

    #[async_trait]
    impl ChatEngine for SilentChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, EngineError> {
            Ok(String::new())
        }
    }

    /// Waits until `round` utterances have been flushed to the speaker's
    /// buffer and no capture task is still running.
    async fn wait_for_settled_round(active: &ActiveSession, round: u64) -> anyhow::Result<()> {
        for _ in 0..40 {
            let settled = {
                let capture = active.capture.lock().await;
                let flushed = capture
                    .buffers
                    .first()
                    .and_then(|b| std::fs::metadata(&b.pcm_path).ok())
                    .map(|m| m.len())
                    .unwrap_or(0);
                flushed == round * 320 && capture.handles.iter().all(|h| h.is_finished())
            };
            if settled {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("utterance {} did not settle", round)
    }

    #[tokio::test]
    async fn test_finished_utterance_handles_pruned_on_new_speech() -> anyhow::Result<()> {
        let db_dir = TempDir::new()?;
        let store = Arc::new(KnowledgeStore::new(db_dir.path().join("store.sqlite"))?);
        let transport = Arc::new(LocalTransport::new());
        let registry = Arc::new(SessionRegistry::new());
        let mut cfg = Config::default();
        cfg.audio.silence_timeout_ms = 100;
        let manager = Arc::new(SessionManager::new(
            &cfg,
            Arc::clone(&registry),
            store,
            Arc::clone(&transport) as Arc<dyn VoiceTransport>,
            Arc::new(NullDirectory),
            Arc::new(RawPcmDecoder::new()),
            Arc::new(SilentTranscription),
            Arc::new(SilentChat),
        ));
        transport.add_room("guild-1", "room-1", true).await;
        transport
            .occupant_joined("guild-1", "room-1", "alice", false)
            .await?;
        manager
            .start_session("guild-1", "room-1", StartOptions::default())
            .await?;
        let active = registry.get("guild-1").await.expect("active session");

        // Each round lets the previous utterance task finish completely, so
        // the spawn for the next one sees only dead handles to prune.
        for round in 1..=3u64 {
            let tx = transport
                .speaking_started("guild-1", "room-1", "alice")
                .await?;
            tx.send(vec![0; 320]).await?;
            drop(tx);
            wait_for_settled_round(&active, round).await?;
            let retained = active.capture.lock().await.handles.len();
            assert_eq!(retained, 1, "round {}", round);
        }

        manager
            .stop_session("guild-1", StopOptions::default())
            .await?;
        Ok(())
    }
}
