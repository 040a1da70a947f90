//! Audio-callback sink using rodio
//!
//! The device pulls samples from the same [`RingBuffer`] the harness writer
//! drains. An empty ring while playing is an underrun: it is recorded, and a
//! short block of silence keeps the device stream alive until data returns.

use crate::ring_buffer::RingBuffer;
use crate::{Result, SidFlowError};
use rodio::{OutputStream, Sink, Source};
use sidflow_common::{BYTES_PER_SAMPLE, PcmFormat};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Frames pulled from the ring per refill
const REFILL_FRAMES: usize = 1024;

/// rodio source reading s16le frames out of a ring buffer
struct RingSource {
    ring: Arc<RingBuffer>,
    format: PcmFormat,
    finished: Arc<AtomicBool>,
    bytes: Vec<u8>,
    samples: Vec<i16>,
    pos: usize,
}

impl RingSource {
    fn new(ring: Arc<RingBuffer>, format: PcmFormat, finished: Arc<AtomicBool>) -> Self {
        RingSource {
            bytes: vec![0u8; REFILL_FRAMES * format.frame_bytes()],
            samples: Vec::with_capacity(REFILL_FRAMES * format.channels as usize),
            ring,
            format,
            finished,
            pos: 0,
        }
    }

    /// Returns `false` once the stream is over.
    fn refill(&mut self) -> bool {
        if self.finished.load(Ordering::Relaxed) || self.ring.is_finished() {
            return false;
        }
        self.samples.clear();
        self.pos = 0;

        let read = self.ring.drain(&mut self.bytes);
        if read == 0 {
            // Underrun (recorded by the ring): keep the device fed
            let silence = (REFILL_FRAMES / 8).max(1) * self.format.channels as usize;
            self.samples.resize(silence, 0);
        } else {
            self.samples.extend(
                self.bytes[..read]
                    .chunks_exact(BYTES_PER_SAMPLE)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
            );
        }
        true
    }
}

impl Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        Some(self.samples.len().saturating_sub(self.pos).max(1))
    }

    fn channels(&self) -> u16 {
        self.format.channels
    }

    fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for RingSource {
    type Item = i16;

    fn next(&mut self) -> Option<i16> {
        if self.pos >= self.samples.len() && !self.refill() {
            return None;
        }
        let sample = self.samples.get(self.pos).copied();
        self.pos += 1;
        sample
    }
}

/// Playback to the default system audio device
pub struct NativeOutput {
    _stream: OutputStream,
    sink: Sink,
    finished: Arc<AtomicBool>,
}

impl NativeOutput {
    /// Open the default device and start pulling from `ring`.
    pub fn new(ring: Arc<RingBuffer>) -> Result<Self> {
        let format = ring.format();
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| SidFlowError::AudioDeviceError(format!("failed to open output: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| SidFlowError::AudioDeviceError(format!("failed to create sink: {e}")))?;

        let finished = Arc::new(AtomicBool::new(false));
        sink.append(RingSource::new(ring, format, Arc::clone(&finished)));

        Ok(NativeOutput {
            _stream: stream,
            sink,
            finished,
        })
    }

    /// Pause the device.
    pub fn pause(&self) {
        self.sink.pause();
    }

    /// Resume the device.
    pub fn play(&self) {
        self.sink.play();
    }

    /// Stop pulling; the device stream ends after the current block.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// Block until the ring is drained and the device has played it.
    pub fn wait_for_finish(&self) {
        self.sink.sleep_until_end();
    }
}

impl Drop for NativeOutput {
    fn drop(&mut self) {
        self.finish();
        self.sink.pause();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Telemetry;

    fn source(ring: &Arc<RingBuffer>) -> RingSource {
        RingSource::new(Arc::clone(ring), ring.format(), Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_source_reads_ring_in_order() {
        let telemetry = Arc::new(Telemetry::new());
        let ring = Arc::new(RingBuffer::new(64, PcmFormat::new(8_000, 2), telemetry).unwrap());
        let pcm: Vec<i16> = vec![1, -1, 2, -2, 3, -3];
        let bytes: Vec<u8> = pcm.iter().flat_map(|s| s.to_le_bytes()).collect();
        assert!(ring.try_write(&bytes).is_accepted());
        ring.close();

        let mut src = source(&ring);
        assert_eq!(src.channels(), 2);
        assert_eq!(src.sample_rate(), 8_000);
        let out: Vec<i16> = src.by_ref().collect();
        assert_eq!(out, pcm);
    }

    #[test]
    fn test_silence_and_underrun_when_empty() {
        let telemetry = Arc::new(Telemetry::new());
        let ring = Arc::new(
            RingBuffer::new(64, PcmFormat::new(8_000, 1), Arc::clone(&telemetry)).unwrap(),
        );
        ring.set_playing(true);

        let mut src = source(&ring);
        assert_eq!(src.next(), Some(0));
        assert_eq!(telemetry.snapshot().underruns, 1);
    }

    #[test]
    fn test_finish_ends_stream() {
        let telemetry = Arc::new(Telemetry::new());
        let ring = Arc::new(RingBuffer::new(64, PcmFormat::mono(), telemetry).unwrap());
        let finished = Arc::new(AtomicBool::new(true));
        let mut src = RingSource::new(ring, PcmFormat::mono(), finished);
        assert_eq!(src.next(), None);
    }

    #[test]
    fn test_device_creation() {
        let telemetry = Arc::new(Telemetry::new());
        let ring = Arc::new(RingBuffer::new(4096, PcmFormat::mono(), telemetry).unwrap());
        match NativeOutput::new(ring) {
            Ok(output) => {
                output.pause();
                output.play();
                output.finish();
            }
            Err(err) => eprintln!("Skipping native output test (audio backend unavailable): {err}"),
        }
    }
}
