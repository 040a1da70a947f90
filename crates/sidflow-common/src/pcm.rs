//! PCM format description and immutable sample chunks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Size of one signed 16-bit sample in bytes.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Sample rate and channel layout of a rendering session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Interleaved channel count (1 or 2).
    pub channels: u16,
}

impl PcmFormat {
    /// Create a new format description.
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Mono at the default sample rate.
    pub const fn mono() -> Self {
        Self::new(crate::DEFAULT_SAMPLE_RATE, 1)
    }

    /// Stereo at the default sample rate.
    pub const fn stereo() -> Self {
        Self::new(crate::DEFAULT_SAMPLE_RATE, 2)
    }

    /// Whether the format can be used for a session.
    pub fn is_valid(&self) -> bool {
        self.sample_rate > 0 && matches!(self.channels, 1 | 2)
    }

    /// Bytes per interleaved frame.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Bytes per second of audio.
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * BYTES_PER_SAMPLE as u32
    }

    /// Frame count for a duration, rounded to the nearest frame.
    ///
    /// Negative and non-finite durations map to zero.
    pub fn frames_for_seconds(&self, seconds: f64) -> u64 {
        if !seconds.is_finite() || seconds <= 0.0 {
            return 0;
        }
        (seconds * self.sample_rate as f64).round() as u64
    }

    /// Duration of `frames` frames in seconds.
    pub fn seconds_for_frames(&self, frames: u64) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        frames as f64 / self.sample_rate as f64
    }

    /// Byte length of a duration, always a whole number of frames.
    pub fn bytes_for_seconds(&self, seconds: f64) -> usize {
        self.frames_for_seconds(seconds) as usize * self.frame_bytes()
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::mono()
    }
}

/// An immutable, contiguous run of interleaved 16-bit samples.
///
/// Tagged with the frame offset of its first frame. The sample storage is
/// shared, so cloning a chunk to hand it to both the ring buffer and the
/// render cache does not copy PCM. There is no way to mutate a chunk after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    start_frame: u64,
    channels: u16,
    samples: Arc<[i16]>,
}

impl PcmChunk {
    /// Wrap interleaved samples starting at `start_frame`.
    ///
    /// A trailing partial frame is dropped. `channels` must be non-zero.
    pub fn new(start_frame: u64, channels: u16, mut samples: Vec<i16>) -> Self {
        assert!(channels > 0, "PcmChunk requires at least one channel");
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            start_frame,
            channels,
            samples: samples.into(),
        }
    }

    /// A zero-length chunk positioned at `start_frame`.
    pub fn empty(start_frame: u64, channels: u16) -> Self {
        Self::new(start_frame, channels, Vec::new())
    }

    /// Frame offset of the first frame.
    #[inline]
    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    /// Frame offset one past the last frame.
    #[inline]
    pub fn end_frame(&self) -> u64 {
        self.start_frame + self.frame_count()
    }

    /// Interleaved channel count.
    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        (self.samples.len() / self.channels as usize) as u64
    }

    /// Number of individual samples (frames × channels).
    #[inline]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Size of the PCM payload in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.samples.len() * BYTES_PER_SAMPLE
    }

    /// Whether the chunk holds no frames.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Whether `frame` falls inside this chunk.
    pub fn contains_frame(&self, frame: u64) -> bool {
        frame >= self.start_frame && frame < self.end_frame()
    }

    /// Little-endian byte encoding of the samples (s16le).
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len());
        for sample in self.samples.iter() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    /// Copy out `count` frames starting `offset` frames into the chunk.
    ///
    /// The range is clamped to the chunk; the result keeps absolute frame
    /// offsets.
    pub fn slice_frames(&self, offset: u64, count: u64) -> PcmChunk {
        let total = self.frame_count();
        let offset = offset.min(total);
        let count = count.min(total - offset);
        if offset == 0 && count == total {
            return self.clone();
        }
        let ch = self.channels as usize;
        let from = offset as usize * ch;
        let to = from + count as usize * ch;
        PcmChunk {
            start_frame: self.start_frame + offset,
            channels: self.channels,
            samples: self.samples[from..to].into(),
        }
    }

    /// Concatenate chunks into one chunk starting at `start_frame`.
    ///
    /// The parts are expected to be contiguous and share `channels`.
    pub fn concat(start_frame: u64, channels: u16, parts: &[PcmChunk]) -> PcmChunk {
        match parts {
            [] => PcmChunk::empty(start_frame, channels),
            [single] if single.start_frame == start_frame => single.clone(),
            _ => {
                let total: usize = parts.iter().map(PcmChunk::sample_count).sum();
                let mut samples = Vec::with_capacity(total);
                for part in parts {
                    debug_assert_eq!(part.channels, channels);
                    samples.extend_from_slice(part.samples());
                }
                PcmChunk::new(start_frame, channels, samples)
            }
        }
    }
}
