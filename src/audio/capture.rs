//! Per-speaker utterance capture.
//!
//! Each speaking-started signal runs one capture loop: frames arrive over a
//! channel, are decoded to PCM, and appended to that speaker's backing file
//! inside the session scratch directory. The loop ends when the frame channel
//! closes or no frame arrives within the trailing-silence window, so the same
//! speaker produces a fresh loop per utterance, all appending to one buffer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::debug;

use super::decoder::AudioDecoder;
use crate::error::DecodeError;

/// One speaker's accumulated audio within a session. The backing file lives
/// in the session scratch directory and is removed with it.
#[derive(Debug, Clone)]
pub struct SpeakerBuffer {
    pub user_id: String,
    pub pcm_path: PathBuf,
}

/// Drain one utterance into the speaker's PCM file.
///
/// Returns the number of PCM bytes appended. A decode or write failure ends
/// the utterance; bytes already appended stay in the buffer (partial
/// utterances are acceptable, lost sessions are not).
pub async fn run_utterance(
    decoder: Arc<dyn AudioDecoder>,
    pcm_path: PathBuf,
    mut frames: mpsc::Receiver<Vec<u8>>,
    silence_timeout: Duration,
) -> Result<u64, DecodeError> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&pcm_path)
        .await?;
    let mut written: u64 = 0;

    loop {
        match tokio::time::timeout(silence_timeout, frames.recv()).await {
            Ok(Some(frame)) => {
                let samples = match decoder.decode(&frame) {
                    Ok(samples) => samples,
                    Err(e) => {
                        file.flush().await?;
                        return Err(e);
                    }
                };
                let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
                file.write_all(&pcm).await?;
                written += pcm.len() as u64;
            }
            // Channel closed: the speaker's stream ended.
            Ok(None) => break,
            // Trailing silence elapsed: end of utterance.
            Err(_) => {
                debug!(
                    "Trailing silence reached, closing utterance: {}",
                    pcm_path.display()
                );
                break;
            }
        }
    }

    file.flush().await?;
    Ok(written)
}
