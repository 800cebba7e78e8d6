//! Audio pipeline: frame decoding, per-speaker capture, container framing.

pub mod capture;
pub mod decoder;
pub mod wav;

pub use capture::{run_utterance, SpeakerBuffer};
pub use decoder::{AudioDecoder, RawPcmDecoder, SymphoniaFrameDecoder};
pub use wav::{encode_wav, PcmFormat, WAV_HEADER_LEN};
