//! Voice transport and member directory seams.
//!
//! The session manager consumes room events and per-speaker frame streams
//! through [`VoiceTransport`]; it never touches signaling or connection
//! handshakes. [`LocalTransport`] is the in-process implementation used by
//! the host application and the integration tests: the host feeds occupancy
//! and speaking signals in, the manager sees the same contract a networked
//! transport would provide.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::TransportError;

/// One occupant of a voice room. Automated members (bots, including the
/// recorder itself) are never tracked as participants.
#[derive(Debug, Clone)]
pub struct Occupant {
    pub user_id: String,
    pub is_automated: bool,
}

/// Events delivered for a joined room.
#[derive(Debug)]
pub enum RoomEvent {
    OccupantJoined(Occupant),
    OccupantLeft { user_id: String },
    /// A speaker started talking. Frames for this utterance arrive on the
    /// embedded channel until the speaker pauses and the sender is dropped.
    SpeakingStarted {
        user_id: String,
        frames: mpsc::Receiver<Vec<u8>>,
    },
}

/// Result of joining a room: the occupants present at join time plus the
/// live event stream. Dropping the receiver detaches from the room.
pub struct RoomSubscription {
    pub occupants: Vec<Occupant>,
    pub events: mpsc::Receiver<RoomEvent>,
}

/// Boundary to the voice infrastructure. One joined room per guild.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn join(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<RoomSubscription, TransportError>;

    async fn leave(&self, guild_id: &str) -> Result<(), TransportError>;
}

/// Resolves user ids to human-readable display names.
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    async fn display_name(&self, guild_id: &str, user_id: &str) -> Option<String>;
}

/// Directory that never resolves a name; every speaker falls back to the
/// generic label.
pub struct NullDirectory;

#[async_trait]
impl MemberDirectory for NullDirectory {
    async fn display_name(&self, _guild_id: &str, _user_id: &str) -> Option<String> {
        None
    }
}

/// Fixed name table, filled before sharing.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    names: HashMap<(String, String), String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, guild_id: &str, user_id: &str, name: &str) {
        self.names
            .insert((guild_id.to_string(), user_id.to_string()), name.to_string());
    }
}

#[async_trait]
impl MemberDirectory for StaticDirectory {
    async fn display_name(&self, guild_id: &str, user_id: &str) -> Option<String> {
        self.names
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
    }
}

struct LocalRoom {
    audio: bool,
    occupants: Vec<Occupant>,
}

struct JoinedRoom {
    channel_id: String,
    events: mpsc::Sender<RoomEvent>,
}

#[derive(Default)]
struct LocalState {
    rooms: HashMap<(String, String), LocalRoom>,
    joined: HashMap<String, JoinedRoom>,
}

/// In-process [`VoiceTransport`]: rooms and occupancy are driven by the host
/// through the methods below, and a joined session observes them as events.
#[derive(Default)]
pub struct LocalTransport {
    inner: Mutex<LocalState>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a room. Non-audio rooms exist so that joining them can be
    /// rejected the same way a real transport would reject a text channel.
    pub async fn add_room(&self, guild_id: &str, channel_id: &str, audio: bool) {
        let mut state = self.inner.lock().await;
        state.rooms.insert(
            (guild_id.to_string(), channel_id.to_string()),
            LocalRoom {
                audio,
                occupants: Vec::new(),
            },
        );
    }

    /// Record an occupant entering the room and notify any joined session.
    pub async fn occupant_joined(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
        is_automated: bool,
    ) -> Result<(), TransportError> {
        let occupant = Occupant {
            user_id: user_id.to_string(),
            is_automated,
        };
        let events = {
            let mut state = self.inner.lock().await;
            let key = (guild_id.to_string(), channel_id.to_string());
            let room = state
                .rooms
                .get_mut(&key)
                .ok_or_else(|| TransportError::RoomNotFound(channel_id.to_string()))?;
            if room.occupants.iter().any(|o| o.user_id == user_id) {
                return Ok(());
            }
            room.occupants.push(occupant.clone());
            subscribed_sender(&state, guild_id, channel_id)
        };
        if let Some(tx) = events {
            let _ = tx.send(RoomEvent::OccupantJoined(occupant)).await;
        }
        Ok(())
    }

    /// Record an occupant leaving the room and notify any joined session.
    pub async fn occupant_left(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<(), TransportError> {
        let events = {
            let mut state = self.inner.lock().await;
            let key = (guild_id.to_string(), channel_id.to_string());
            let room = state
                .rooms
                .get_mut(&key)
                .ok_or_else(|| TransportError::RoomNotFound(channel_id.to_string()))?;
            room.occupants.retain(|o| o.user_id != user_id);
            subscribed_sender(&state, guild_id, channel_id)
        };
        if let Some(tx) = events {
            let _ = tx
                .send(RoomEvent::OccupantLeft {
                    user_id: user_id.to_string(),
                })
                .await;
        }
        Ok(())
    }

    /// Signal that a speaker started talking. Returns the sender the host
    /// pushes raw frames into; dropping it ends the utterance.
    pub async fn speaking_started(
        &self,
        guild_id: &str,
        channel_id: &str,
        user_id: &str,
    ) -> Result<mpsc::Sender<Vec<u8>>, TransportError> {
        let events = {
            let state = self.inner.lock().await;
            let key = (guild_id.to_string(), channel_id.to_string());
            if !state.rooms.contains_key(&key) {
                return Err(TransportError::RoomNotFound(channel_id.to_string()));
            }
            subscribed_sender(&state, guild_id, channel_id).ok_or_else(|| {
                TransportError::Other(format!("no session subscribed to {channel_id}"))
            })?
        };
        let (tx, rx) = mpsc::channel(256);
        events
            .send(RoomEvent::SpeakingStarted {
                user_id: user_id.to_string(),
                frames: rx,
            })
            .await
            .map_err(|_| TransportError::Other("room subscription closed".to_string()))?;
        Ok(tx)
    }
}

fn subscribed_sender(
    state: &LocalState,
    guild_id: &str,
    channel_id: &str,
) -> Option<mpsc::Sender<RoomEvent>> {
    state
        .joined
        .get(guild_id)
        .filter(|j| j.channel_id == channel_id)
        .map(|j| j.events.clone())
}

#[async_trait]
impl VoiceTransport for LocalTransport {
    async fn join(
        &self,
        guild_id: &str,
        channel_id: &str,
    ) -> Result<RoomSubscription, TransportError> {
        let mut state = self.inner.lock().await;
        let key = (guild_id.to_string(), channel_id.to_string());
        let room = state
            .rooms
            .get(&key)
            .ok_or_else(|| TransportError::RoomNotFound(channel_id.to_string()))?;
        if !room.audio {
            return Err(TransportError::NotAudioRoom(channel_id.to_string()));
        }
        let occupants = room.occupants.clone();
        let (tx, rx) = mpsc::channel(64);
        state.joined.insert(
            guild_id.to_string(),
            JoinedRoom {
                channel_id: channel_id.to_string(),
                events: tx,
            },
        );
        Ok(RoomSubscription {
            occupants,
            events: rx,
        })
    }

    async fn leave(&self, guild_id: &str) -> Result<(), TransportError> {
        let mut state = self.inner.lock().await;
        // Dropping the sender closes the session's event stream.
        state.joined.remove(guild_id);
        Ok(())
    }
}
