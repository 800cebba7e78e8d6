//! Per-speaker transcription against an OpenAI-style audio endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::multipart;
use serde_json::Value;
use tracing::{debug, warn};

use crate::audio::{encode_wav, PcmFormat, SpeakerBuffer};
use crate::config::TranscriptionConfig;
use crate::error::EngineError;
use crate::transport::MemberDirectory;

/// One speaker's transcribed contribution to a session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptFragment {
    pub user_id: String,
    pub username: String,
    pub text: String,
}

/// Speech-to-text boundary. Input is one finished WAV clip.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, EngineError>;
}

/// Client for an OpenAI-compatible `audio/transcriptions` endpoint.
pub struct OpenAiTranscription {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiTranscription {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Build from configuration, reading the API key from the configured
    /// environment variable.
    pub fn from_config(cfg: &TranscriptionConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| EngineError::MissingApiKey(cfg.api_key_env.clone()))?;
        Ok(Self::new(cfg.base_url.clone(), api_key, cfg.model.clone()))
    }
}

#[async_trait]
impl TranscriptionEngine for OpenAiTranscription {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, EngineError> {
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let body: Value = response.json().await?;
        let text = body
            .get("text")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                EngineError::InvalidResponse("transcription response missing text".to_string())
            })?;
        Ok(text.trim().to_string())
    }
}

/// Transcribe every speaker buffer concurrently. Speakers whose buffer is
/// missing, shorter than `min_buffer_bytes`, or whose engine call fails are
/// omitted from the result; one bad speaker never discards the batch.
/// Fragments come back in buffer order.
pub async fn transcribe_buffers(
    engine: Arc<dyn TranscriptionEngine>,
    directory: Arc<dyn MemberDirectory>,
    guild_id: &str,
    format: PcmFormat,
    min_buffer_bytes: u64,
    buffers: &[SpeakerBuffer],
) -> Vec<TranscriptFragment> {
    let tasks = buffers.iter().map(|buffer| {
        let engine = Arc::clone(&engine);
        let directory = Arc::clone(&directory);
        async move {
            transcribe_one(engine, directory, guild_id, format, min_buffer_bytes, buffer).await
        }
    });
    join_all(tasks).await.into_iter().flatten().collect()
}

async fn transcribe_one(
    engine: Arc<dyn TranscriptionEngine>,
    directory: Arc<dyn MemberDirectory>,
    guild_id: &str,
    format: PcmFormat,
    min_buffer_bytes: u64,
    buffer: &SpeakerBuffer,
) -> Option<TranscriptFragment> {
    let pcm = match tokio::fs::read(&buffer.pcm_path).await {
        Ok(pcm) => pcm,
        Err(e) => {
            debug!("No capture buffer to transcribe for {}: {}", buffer.user_id, e);
            return None;
        }
    };
    if (pcm.len() as u64) < min_buffer_bytes {
        debug!(
            "Capture buffer for {} below minimum size ({} bytes), skipping",
            buffer.user_id,
            pcm.len()
        );
        return None;
    }
    let wav = encode_wav(format, &pcm);
    let text = match engine.transcribe(wav).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Transcription failed for {}: {}", buffer.user_id, e);
            return None;
        }
    };
    if text.is_empty() {
        debug!("Transcription produced no text for {}", buffer.user_id);
        return None;
    }
    let username = directory
        .display_name(guild_id, &buffer.user_id)
        .await
        .unwrap_or_else(|| format!("User {}", buffer.user_id));
    Some(TranscriptFragment {
        user_id: buffer.user_id.clone(),
        username,
        text,
    })
}
