//! RIFF/WAVE container framing for accumulated PCM buffers.
//!
//! The header layout is a binary contract with the transcription engine:
//! every field is written explicitly so the output is byte-exact regardless
//! of platform. Degenerate (empty) buffers are skipped by callers before
//! encoding, not here.

/// Length of the fixed RIFF/WAVE header produced by [`encode_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// Fixed sample layout of the capture pipeline. These are configuration
/// constants of the whole pipeline, not per-call parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl PcmFormat {
    /// Bytes of audio per second: `sample_rate * channels * bits_per_sample / 8`.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.bits_per_sample as u32 / 8
    }

    /// Bytes per sample frame across all channels.
    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
        }
    }
}

/// Wrap raw PCM bytes in a self-describing WAVE container.
///
/// Layout: `RIFF` / chunk size (`data_len + 36`) / `WAVE` / `fmt ` subchunk
/// (16 bytes, format tag 1 = uncompressed linear PCM) / `data` subchunk with
/// the raw bytes appended unchanged.
pub fn encode_wav(format: PcmFormat, pcm: &[u8]) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(data_len + 36).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&format.byte_rate().to_le_bytes());
    out.extend_from_slice(&format.block_align().to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(pcm);

    out
}
