//! Deterministic emulator stand-in for tests.
//!
//! Only compiled for this crate's own tests or with the `test-utils` feature.
//! Samples are a pure function of song, frame and channel, so any two ways of
//! reaching a frame (batch sizes, seeks, checkpoint restores) must agree with
//! [`expected_samples`].

use crate::{BackendError, DEFAULT_SAMPLE_RATE, EmulatorBackend, PcmFormat, Rendered, TuneInfo};

/// Magic prefix the mock accepts as a tune.
pub const MOCK_MAGIC: &[u8] = b"MOCK";

/// Emulated clock of [`MockBackend`].
pub const MOCK_CLOCK_HZ: u32 = 1_000_000;

/// Sample value for `frame`/`channel` of `song`; independent of batch sizes.
pub fn mock_sample(song: u16, frame: u64, channel: u16) -> i16 {
    let mixed = (frame as u32)
        .wrapping_mul(7919)
        .wrapping_add(song as u32 * 1_009)
        .wrapping_add(channel as u32 * 97);
    (mixed & 0xFFFF) as u16 as i16
}

/// Endless mock tune with `songs` subtunes.
pub fn mock_tune(songs: u8) -> Vec<u8> {
    let mut bytes = MOCK_MAGIC.to_vec();
    bytes.push(songs);
    bytes
}

/// Mock tune that ends after `length_tenths` tenths of a second (0 = endless).
pub fn mock_tune_with_length(songs: u8, length_tenths: u16) -> Vec<u8> {
    let mut bytes = mock_tune(songs);
    bytes.extend_from_slice(&length_tenths.to_le_bytes());
    bytes
}

/// Expected PCM for `frames` frames of `song` starting at `start`.
pub fn expected_samples(song: u16, channels: u16, start: u64, frames: u64) -> Vec<i16> {
    let mut out = Vec::with_capacity((frames * channels as u64) as usize);
    for frame in start..start + frames {
        for ch in 0..channels {
            out.push(mock_sample(song, frame, ch));
        }
    }
    out
}

/// Opaque mock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSnapshot {
    frame: u64,
    remainder: u64,
}

/// Emulator stand-in producing a ramp-like signal at a fixed rate.
#[derive(Debug)]
pub struct MockBackend {
    format: PcmFormat,
    fixed_length: Option<u64>,
    length_frames: Option<u64>,
    snapshots: bool,
    info: Option<TuneInfo>,
    song: u16,
    frame: u64,
    remainder: u64,
    render_calls: u64,
    select_calls: u64,
    restore_calls: u64,
}

impl MockBackend {
    /// Mock rendering at `sample_rate` with `channels` channels.
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            format: PcmFormat::new(sample_rate, channels),
            fixed_length: None,
            length_frames: None,
            snapshots: false,
            info: None,
            song: 1,
            frame: 0,
            remainder: 0,
            render_calls: 0,
            select_calls: 0,
            restore_calls: 0,
        }
    }

    /// Mono at the default sample rate.
    pub fn mono() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE, 1)
    }

    /// End every song after `frames` frames, whatever the tune bytes say.
    pub fn with_length_frames(mut self, frames: u64) -> Self {
        self.fixed_length = Some(frames);
        self
    }

    /// Support [`snapshot`](EmulatorBackend::snapshot) / [`restore`](EmulatorBackend::restore).
    pub fn with_snapshots(mut self) -> Self {
        self.snapshots = true;
        self
    }

    /// Calls to `render_cycles` so far.
    pub fn render_calls(&self) -> u64 {
        self.render_calls
    }

    /// Calls to `select_song` so far.
    pub fn select_calls(&self) -> u64 {
        self.select_calls
    }

    /// Successful `restore` calls so far.
    pub fn restore_calls(&self) -> u64 {
        self.restore_calls
    }
}

impl EmulatorBackend for MockBackend {
    type Snapshot = MockSnapshot;

    fn load_tune(&mut self, data: &[u8]) -> Result<TuneInfo, BackendError> {
        let Some(header) = data.strip_prefix(MOCK_MAGIC) else {
            return Err(BackendError::InvalidFormat("missing MOCK header".into()));
        };
        let songs = header.first().copied().unwrap_or(1).max(1);
        let tenths = match header.get(1..3) {
            Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
            _ => 0,
        };
        self.length_frames = self
            .fixed_length
            .or_else(|| (tenths > 0).then(|| tenths as u64 * self.format.sample_rate as u64 / 10));

        let mut info = TuneInfo::with_title_author("Mock Tune", "Test Suite");
        info.song_count = songs as u16;
        info.duration_seconds = self
            .length_frames
            .map(|frames| self.format.seconds_for_frames(frames));
        self.info = Some(info.clone());
        self.song = 1;
        self.frame = 0;
        self.remainder = 0;
        Ok(info)
    }

    fn tune_info(&self) -> Option<&TuneInfo> {
        self.info.as_ref()
    }

    fn select_song(&mut self, index: u16) -> Result<(), BackendError> {
        let info = self.info.as_ref().ok_or(BackendError::NotLoaded)?;
        if !info.has_song(index) {
            return Err(BackendError::InvalidArgument(format!("no song {index}")));
        }
        self.select_calls += 1;
        self.song = index;
        self.frame = 0;
        self.remainder = 0;
        Ok(())
    }

    fn render_cycles(&mut self, cycles: u32) -> Result<Rendered, BackendError> {
        if self.info.is_none() {
            return Err(BackendError::NotLoaded);
        }
        if cycles == 0 {
            return Err(BackendError::InvalidArgument("zero cycles".into()));
        }
        self.render_calls += 1;
        if self.length_frames.is_some_and(|len| self.frame >= len) {
            return Ok(Rendered::EndOfStream);
        }

        let total = self.remainder + cycles as u64 * self.format.sample_rate as u64;
        let mut frames = total / MOCK_CLOCK_HZ as u64;
        self.remainder = total % MOCK_CLOCK_HZ as u64;
        if let Some(len) = self.length_frames {
            frames = frames.min(len - self.frame);
        }

        let samples = expected_samples(self.song, self.format.channels, self.frame, frames);
        self.frame += frames;
        Ok(Rendered::Samples(samples))
    }

    fn format(&self) -> PcmFormat {
        self.format
    }

    fn clock_hz(&self) -> u32 {
        MOCK_CLOCK_HZ
    }

    fn snapshot(&self) -> Option<MockSnapshot> {
        self.snapshots.then_some(MockSnapshot {
            frame: self.frame,
            remainder: self.remainder,
        })
    }

    fn restore(&mut self, snapshot: &MockSnapshot) -> bool {
        if !self.snapshots {
            return false;
        }
        self.restore_calls += 1;
        self.frame = snapshot.frame;
        self.remainder = snapshot.remainder;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_from_tune_bytes() {
        let mut backend = MockBackend::new(1_000, 1);
        let info = backend.load_tune(&mock_tune_with_length(2, 5)).unwrap();
        assert_eq!(info.song_count, 2);
        assert_eq!(info.duration_seconds, Some(0.5));

        let mut frames = 0;
        while let Rendered::Samples(batch) = backend.render_cycles(100_000).unwrap() {
            frames += batch.len();
        }
        assert_eq!(frames, 500);
    }

    #[test]
    fn test_builder_length_overrides_tune() {
        let mut backend = MockBackend::new(1_000, 1).with_length_frames(10);
        let info = backend.load_tune(&mock_tune_with_length(1, 50)).unwrap();
        assert_eq!(info.duration_seconds, Some(0.01));
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        let mut backend = MockBackend::mono();
        assert!(matches!(
            backend.load_tune(b"PSID"),
            Err(BackendError::InvalidFormat(_))
        ));
    }
}
