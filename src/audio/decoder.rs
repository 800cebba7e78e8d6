//! Per-frame audio decoding into interleaved 16-bit PCM.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;

/// Converts one speaker's inbound audio frame into raw interleaved i16 PCM.
///
/// Stateless per invocation: each frame must be decodable on its own. A
/// failure affects only the utterance it occurred in; other speakers'
/// pipelines are untouched.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, frame: &[u8]) -> Result<Vec<i16>, DecodeError>;
}

/// Decodes self-contained compressed frames (Opus-in-OGG, MP3, FLAC, ...)
/// by probing each payload with symphonia.
#[derive(Debug, Default)]
pub struct SymphoniaFrameDecoder;

impl SymphoniaFrameDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for SymphoniaFrameDecoder {
    fn decode(&self, frame: &[u8]) -> Result<Vec<i16>, DecodeError> {
        let cursor = Cursor::new(frame.to_vec());
        let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

        let probed = symphonia::default::get_probe().format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;
        let mut format = probed.format;

        let track = format
            .default_track()
            .ok_or_else(|| SymphoniaError::Unsupported("no audio track in frame"))?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                // End of the in-memory frame, not a failure.
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = decoder.decode(&packet)?;
            let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, *decoded.spec());
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }

        Ok(samples)
    }
}

/// Passthrough for transports that already deliver little-endian i16 PCM.
#[derive(Debug, Default)]
pub struct RawPcmDecoder;

impl RawPcmDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for RawPcmDecoder {
    fn decode(&self, frame: &[u8]) -> Result<Vec<i16>, DecodeError> {
        if frame.len() % 2 != 0 {
            return Err(DecodeError::TruncatedFrame(frame.len()));
        }
        Ok(frame
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}
