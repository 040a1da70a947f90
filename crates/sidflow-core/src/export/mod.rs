//! Offline audio export
//!
//! Renders are plain PCM chunks, so export is a matter of framing them as a
//! canonical RIFF/WAVE file: a 44-byte header (PCM, 16-bit) followed by
//! little-endian interleaved samples.

mod wav;

pub use wav::{WAV_HEADER_LEN, export_wav, export_wav_chunk, wav_header, write_wav};
