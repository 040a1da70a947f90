//! WAV file export functionality

use crate::engine::{Engine, RenderOutcome};
use crate::{Result, SidFlowError};
use log::info;
use sidflow_common::{BYTES_PER_SAMPLE, EmulatorBackend, PcmChunk, PcmFormat};
use std::io::{Seek, Write};
use std::path::Path;

/// Size of the canonical PCM WAV header.
pub const WAV_HEADER_LEN: usize = 44;

/// Seconds rendered per step by [`export_wav`].
const EXPORT_STEP_SECONDS: f64 = 1.0;

fn spec_for(format: PcmFormat) -> hound::WavSpec {
    hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn wav_error(err: hound::Error) -> SidFlowError {
    match err {
        hound::Error::IoError(e) => SidFlowError::Io(e),
        other => SidFlowError::Other(format!("WAV encoding failed: {other}")),
    }
}

/// Canonical 44-byte header for `data_len` bytes of 16-bit PCM.
///
/// Useful for streaming writers that emit the header before the data length
/// is final (pass `u32::MAX - 36` in that case).
pub fn wav_header(format: PcmFormat, data_len: u32) -> [u8; WAV_HEADER_LEN] {
    let block_align = format.frame_bytes() as u16;
    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&data_len.saturating_add(36).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.byte_rate().to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&(BYTES_PER_SAMPLE as u16 * 8).to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Write interleaved samples as a WAV stream.
pub fn write_wav<W: Write + Seek>(writer: W, samples: &[i16], format: PcmFormat) -> Result<()> {
    let mut wav = hound::WavWriter::new(writer, spec_for(format)).map_err(wav_error)?;
    let mut pcm = wav.get_i16_writer(samples.len() as u32);
    for &sample in samples {
        pcm.write_sample(sample);
    }
    pcm.flush().map_err(wav_error)?;
    wav.finalize().map_err(wav_error)
}

/// Write a rendered chunk to a WAV file.
pub fn export_wav_chunk<P: AsRef<Path>>(path: P, chunk: &PcmChunk, format: PcmFormat) -> Result<()> {
    if chunk.channels() != format.channels {
        return Err(SidFlowError::InvalidArgument(format!(
            "chunk has {} channel(s), format has {}",
            chunk.channels(),
            format.channels
        )));
    }
    let file = std::fs::File::create(path.as_ref())?;
    write_wav(std::io::BufWriter::new(file), chunk.samples(), format)
}

/// Render up to `seconds` from the engine's current position into a WAV file.
///
/// Rendering stops early at the end of the tune. Returns the number of frames
/// written.
pub fn export_wav<B, P>(engine: &mut Engine<B>, path: P, seconds: f64) -> Result<u64>
where
    B: EmulatorBackend,
    P: AsRef<Path>,
{
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(SidFlowError::InvalidArgument(format!(
            "export duration must be a non-negative number of seconds, got {seconds}"
        )));
    }
    let format = engine.format();
    let total = format.frames_for_seconds(seconds);
    let mut wav = hound::WavWriter::create(path.as_ref(), spec_for(format)).map_err(wav_error)?;

    let mut written: u64 = 0;
    while written < total {
        let step = format
            .frames_for_seconds(EXPORT_STEP_SECONDS)
            .min(total - written);
        let report = engine.render_seconds_report(format.seconds_for_frames(step), None)?;
        for &sample in report.chunk.samples() {
            wav.write_sample(sample).map_err(wav_error)?;
        }
        written += report.chunk.frame_count();
        if report.outcome != RenderOutcome::Completed {
            break;
        }
    }

    wav.finalize().map_err(wav_error)?;
    info!(
        "exported {written} frames ({:.1}s) to {}",
        format.seconds_for_frames(written),
        path.as_ref().display()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use sidflow_common::test_utils::{MockBackend, expected_samples, mock_tune};
    use std::io::Cursor;

    #[test]
    fn test_header_matches_hound_output() {
        let format = PcmFormat::new(44_100, 2);
        let samples: Vec<i16> = (0..400).map(|i| (i * 37) as i16).collect();

        let mut bytes = Vec::new();
        write_wav(Cursor::new(&mut bytes), &samples, format).unwrap();

        let data_len = (samples.len() * BYTES_PER_SAMPLE) as u32;
        assert_eq!(bytes.len(), WAV_HEADER_LEN + data_len as usize);
        assert_eq!(&bytes[..WAV_HEADER_LEN], &wav_header(format, data_len)[..]);
        assert_eq!(&bytes[WAV_HEADER_LEN..WAV_HEADER_LEN + 2], &samples[0].to_le_bytes());
    }

    #[test]
    fn test_export_chunk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.wav");
        let chunk = PcmChunk::new(0, 1, vec![0, 1000, -1000, i16::MAX, i16::MIN]);
        export_wav_chunk(&path, &chunk, PcmFormat::new(8_000, 1)).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, chunk.samples());
    }

    #[test]
    fn test_export_chunk_rejects_channel_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = PcmChunk::new(0, 2, vec![1, 2]);
        let err = export_wav_chunk(dir.path().join("x.wav"), &chunk, PcmFormat::mono());
        assert!(matches!(err, Err(SidFlowError::InvalidArgument(_))));
    }

    #[test]
    fn test_export_engine_stops_at_end_of_tune() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.wav");
        let mut engine = Engine::new(
            MockBackend::new(8_000, 1).with_length_frames(12_000),
            EngineConfig::default(),
        );
        engine.load_tune(&mock_tune(1)).unwrap();

        let frames = export_wav(&mut engine, &path, 5.0).unwrap();
        assert_eq!(frames, 12_000);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, expected_samples(1, 1, 0, 12_000));
    }
}
