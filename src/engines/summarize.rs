//! Session summarization via an OpenAI-style chat-completion endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::SummaryConfig;
use crate::engines::transcribe::TranscriptFragment;
use crate::error::EngineError;

const SYSTEM_PROMPT: &str =
    "You are an assistant that writes concise meeting summaries for students.";

const SUMMARY_INSTRUCTION: &str = "Please provide a concise summary (under 250 words) highlighting key points, decisions, action items, and questions raised. Include bullet points and mention specific dates or names when present.";

/// Chat-completion boundary used for summaries.
#[async_trait]
pub trait ChatEngine: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError>;
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    /// Build from configuration, reading the API key from the configured
    /// environment variable.
    pub fn from_config(cfg: &SummaryConfig) -> Result<Self, EngineError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| EngineError::MissingApiKey(cfg.api_key_env.clone()))?;
        Ok(Self::new(
            cfg.base_url.clone(),
            api_key,
            cfg.model.clone(),
            cfg.temperature,
            cfg.max_tokens,
        ))
    }
}

#[async_trait]
impl ChatEngine for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String, EngineError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
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
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                EngineError::InvalidResponse("chat response missing message content".to_string())
            })?;
        Ok(content.trim().to_string())
    }
}

/// Topic and date context carried into the summary prompt.
#[derive(Debug, Clone)]
pub struct SummaryContext {
    pub topic: Option<String>,
    pub date: DateTime<Utc>,
}

/// Final text artifacts of a session: the combined transcript plus an
/// optional generated summary.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub transcript: String,
    pub summary: Option<String>,
}

/// One `username: text` line per fragment, in fragment order.
pub fn combine_fragments(fragments: &[TranscriptFragment]) -> String {
    fragments
        .iter()
        .map(|f| format!("{}: {}", f.username, f.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_user_prompt(transcript: &str, ctx: &SummaryContext) -> String {
    let mut parts = Vec::new();
    if let Some(topic) = &ctx.topic {
        parts.push(format!("Class topic: {topic}"));
    }
    parts.push(format!(
        "Class date: {}",
        ctx.date.to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    parts.push("Transcript:".to_string());
    parts.push(transcript.to_string());
    parts.push(format!("\n\n{SUMMARY_INSTRUCTION}"));
    parts.join("\n")
}

/// Produces the session's final text artifacts from transcript fragments.
pub struct Summarizer {
    engine: Arc<dyn ChatEngine>,
}

impl Summarizer {
    pub fn new(engine: Arc<dyn ChatEngine>) -> Self {
        Self { engine }
    }

    /// Combine the fragments and request a bounded summary. Engine failures
    /// degrade to `summary = None`; the transcript always survives. Zero
    /// fragments short-circuit without calling the engine.
    pub async fn summarize(
        &self,
        fragments: &[TranscriptFragment],
        ctx: &SummaryContext,
    ) -> SessionSummary {
        let transcript = combine_fragments(fragments);
        if transcript.is_empty() {
            return SessionSummary {
                transcript,
                summary: None,
            };
        }
        let user_prompt = build_user_prompt(&transcript, ctx);
        match self.engine.complete(SYSTEM_PROMPT, &user_prompt).await {
            Ok(text) if !text.is_empty() => SessionSummary {
                transcript,
                summary: Some(text),
            },
            Ok(_) => {
                debug!("Summary engine returned empty text");
                SessionSummary {
                    transcript,
                    summary: None,
                }
            }
            Err(e) => {
                warn!("Summary generation failed: {}", e);
                SessionSummary {
                    transcript,
                    summary: None,
                }
            }
        }
    }
}
