// Scripted Session Demo: full capture → transcribe → summarize → persist cycle
//
// Everything runs in-process: the voice transport is the local implementation
// and the transcription/chat engines are scripted stand-ins, so the demo needs
// no network access or API keys. The "audio" frames carry UTF-8 text that the
// scripted transcriber echoes back, which makes the pipeline's plumbing easy
// to watch end to end:
// 1. A room is registered and two speakers join
// 2. A session starts with a topic
// 3. Both speakers talk
// 4. The session stops; transcript and summary are persisted
// 5. The knowledge index is searched the way other features would

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use class_scribe::audio::{RawPcmDecoder, WAV_HEADER_LEN};
use class_scribe::engines::{ChatEngine, TranscriptionEngine};
use class_scribe::error::EngineError;
use class_scribe::session::{SessionManager, SessionRegistry, StartOptions, StopOptions};
use class_scribe::store::KnowledgeStore;
use class_scribe::transport::{LocalTransport, StaticDirectory, VoiceTransport};
use class_scribe::Config;
use tracing::info;

/// Echoes the WAV payload back as the "transcription". The demo's frames are
/// UTF-8 text, so what a speaker sends is what the transcript shows.
struct ScriptedTranscription;

#[async_trait]
impl TranscriptionEngine for ScriptedTranscription {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, EngineError> {
        Ok(String::from_utf8_lossy(&wav[WAV_HEADER_LEN..])
            .trim()
            .to_string())
    }
}

struct ScriptedChat;

#[async_trait]
impl ChatEngine for ScriptedChat {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, EngineError> {
        let lines = user.lines().filter(|l| l.contains(": ")).count();
        Ok(format!(
            "Scripted summary over {lines} transcript line(s): the class reviewed \
             photosynthesis inputs and agreed on Friday's quiz scope."
        ))
    }
}

/// One utterance: text bytes as PCM frames, padded to whole 16-bit samples.
async fn speak(
    transport: &LocalTransport,
    guild_id: &str,
    channel_id: &str,
    user_id: &str,
    line: &str,
) -> Result<()> {
    let tx = transport
        .speaking_started(guild_id, channel_id, user_id)
        .await?;
    let mut payload = line.as_bytes().to_vec();
    if payload.len() % 2 != 0 {
        payload.push(b' ');
    }
    tx.send(payload).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("🎙️  Scripted voice session demo");

    let db_dir = tempfile::tempdir()?;
    let store = Arc::new(KnowledgeStore::new(db_dir.path().join("demo.sqlite"))?);
    let transport = Arc::new(LocalTransport::new());
    let mut directory = StaticDirectory::new();
    directory.insert("demo-guild", "alice", "Alice");
    directory.insert("demo-guild", "bob", "Bob");

    let mut cfg = Config::default();
    cfg.audio.silence_timeout_ms = 200;
    // The scripted lines are tiny compared to real audio.
    cfg.transcription.min_buffer_bytes = 16;

    let manager = Arc::new(SessionManager::new(
        &cfg,
        Arc::new(SessionRegistry::new()),
        Arc::clone(&store),
        Arc::clone(&transport) as Arc<dyn VoiceTransport>,
        Arc::new(directory),
        Arc::new(RawPcmDecoder::new()),
        Arc::new(ScriptedTranscription),
        Arc::new(ScriptedChat),
    ));

    // 1. Register the room and seat the class
    transport.add_room("demo-guild", "study-hall", true).await;
    transport
        .occupant_joined("demo-guild", "study-hall", "alice", false)
        .await?;
    transport
        .occupant_joined("demo-guild", "study-hall", "bob", false)
        .await?;
    info!("✅ Room ready with 2 occupants");

    // 2. Start recording
    let session = manager
        .start_session(
            "demo-guild",
            "study-hall",
            StartOptions {
                initiator_id: Some("alice".to_string()),
                topic: Some("Photosynthesis review".to_string()),
            },
        )
        .await?;
    info!("✅ Session {} started", session.id);

    // 3. Scripted conversation
    speak(
        &transport,
        "demo-guild",
        "study-hall",
        "alice",
        "chlorophyll absorbs light energy to split water",
    )
    .await?;
    speak(
        &transport,
        "demo-guild",
        "study-hall",
        "bob",
        "so the oxygen we breathe is a byproduct",
    )
    .await?;
    info!("🗣️  Both speakers delivered their lines");

    // 4. Stop and inspect the outcome
    let outcome = manager
        .stop_session(
            "demo-guild",
            StopOptions {
                ended_by: Some("alice".to_string()),
                reason: None,
            },
        )
        .await?;
    info!(
        "✅ Session {} stopped with {} transcript fragment(s)",
        outcome.session.id,
        outcome.fragments.len()
    );
    info!("📝 Transcript:\n{}", outcome.transcript);
    if let Some(summary) = &outcome.summary {
        info!("🧾 Summary: {}", summary);
    }

    // 5. Query the knowledge index the way other features do
    let hits = store.search("demo-guild", "oxygen", 5)?;
    info!("🔎 Search for \"oxygen\" returned {} snippet(s)", hits.len());

    Ok(())
}
