//! Render pump: engine → ring buffer, on its own thread.

use super::SessionControl;
use crate::engine::{Engine, RenderOutcome};
use crate::ring_buffer::{RingBuffer, WriteResult};
use log::{debug, error, info};
use sidflow_common::{EmulatorBackend, PcmChunk};
use std::sync::Arc;
use std::time::Duration;

const PAUSE_POLL: Duration = Duration::from_millis(50);

pub(crate) struct PumpSettings {
    pub chunk_frames: u64,
    /// Stop after this many frames (the requested playback duration)
    pub limit_frames: Option<u64>,
    pub backoff: Duration,
}

/// Render chunks into `ring` until the tune ends, the duration is reached or
/// the session is cancelled. The ring is always closed on return.
pub(crate) fn run_render_pump<B: EmulatorBackend>(
    mut engine: Engine<B>,
    ring: Arc<RingBuffer>,
    control: Arc<SessionControl>,
    settings: PumpSettings,
) {
    let rate = engine.sample_rate() as f64;
    let mut produced: u64 = 0;
    let mut streaming = false;

    loop {
        if control.is_cancelled() {
            break;
        }
        if control.is_paused() {
            control.wait_while_paused(PAUSE_POLL);
            continue;
        }

        let mut frames = settings.chunk_frames.max(1);
        if let Some(limit) = settings.limit_frames {
            let left = limit.saturating_sub(produced);
            if left == 0 {
                info!("requested duration reached after {produced} frames");
                break;
            }
            frames = frames.min(left);
        }

        let report = match engine.render_seconds_report(frames as f64 / rate, None) {
            Ok(report) => report,
            Err(e) => {
                error!("render failed at frame {}: {e}", engine.current_frame());
                control.fail(format!("render failed: {e}"));
                break;
            }
        };
        produced += report.chunk.frame_count();

        if !report.chunk.is_empty() {
            if !push_chunk(&ring, &report.chunk, &control, settings.backoff) {
                break;
            }
            if !streaming {
                ring.set_playing(true);
                streaming = true;
            }
        }

        match report.outcome {
            RenderOutcome::Completed => {}
            RenderOutcome::EndOfStream => {
                info!("end of tune after {produced} frames");
                break;
            }
            RenderOutcome::Cancelled => break,
        }
    }

    debug!("render pump finished ({produced} frames)");
    ring.close();
}

/// Write a chunk in frame-aligned pieces no larger than a quarter of the
/// ring, backing off while it is full. Returns `false` if the session ended.
fn push_chunk(ring: &RingBuffer, chunk: &PcmChunk, control: &SessionControl, backoff: Duration) -> bool {
    let frame_bytes = ring.frame_bytes();
    let piece_len = ((ring.capacity() / 4) / frame_bytes).max(1) * frame_bytes;
    let bytes = chunk.to_le_bytes();

    for piece in bytes.chunks(piece_len) {
        loop {
            if control.is_cancelled() {
                return false;
            }
            if control.is_paused() {
                control.wait_while_paused(PAUSE_POLL);
                continue;
            }
            match ring.try_write(piece) {
                WriteResult::Accepted => break,
                WriteResult::Closed => return false,
                WriteResult::Rejected { .. } => {
                    ring.wait_for_space(piece.len(), backoff);
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::sink::{MemorySink, PlaybackSink, PumpExit, SinkWrite, pump_ring_to_sink};
    use crate::telemetry::Telemetry;
    use sidflow_common::test_utils::{MockBackend, expected_samples, mock_tune};
    use std::io;
    use std::time::Instant;

    fn engine(length_frames: u64) -> Engine<MockBackend> {
        let backend = MockBackend::new(8_000, 1).with_length_frames(length_frames);
        let mut engine = Engine::new(backend, EngineConfig::default());
        engine.load_tune(&mock_tune(1)).unwrap();
        engine
    }

    fn drain_all(ring: &RingBuffer) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        while !ring.is_finished() {
            let n = ring.drain_blocking(&mut buf, Duration::from_millis(20));
            out.extend_from_slice(&buf[..n]);
        }
        out
    }

    fn as_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    /// Takes audio no faster than it plays, like a sound card with a small
    /// hardware buffer.
    struct RealTimeSink {
        inner: MemorySink,
        byte_rate: f64,
        lead: Duration,
        delivered: u64,
        started: Option<Instant>,
    }

    impl RealTimeSink {
        fn new(byte_rate: u32, lead: Duration) -> Self {
            Self {
                inner: MemorySink::new(),
                byte_rate: byte_rate as f64,
                lead,
                delivered: 0,
                started: None,
            }
        }
    }

    impl PlaybackSink for RealTimeSink {
        fn write(&mut self, bytes: &[u8]) -> io::Result<SinkWrite> {
            let started = *self.started.get_or_insert_with(Instant::now);
            let queued = Duration::from_secs_f64(self.delivered as f64 / self.byte_rate);
            if let Some(wait) = queued
                .checked_sub(self.lead)
                .and_then(|due| due.checked_sub(started.elapsed()))
            {
                std::thread::sleep(wait);
            }
            let result = self.inner.write(bytes)?;
            let taken = match result {
                SinkWrite::Accepted => bytes.len(),
                SinkWrite::Partial(n) => n,
            };
            self.delivered += taken as u64;
            Ok(result)
        }

        fn wait_drained(&mut self) -> io::Result<()> {
            self.inner.wait_drained()
        }

        fn close(&mut self) -> io::Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_pump_streams_whole_tune_through_small_ring() {
        let telemetry = Arc::new(Telemetry::new());
        let ring = Arc::new(
            RingBuffer::with_seconds(engine(4_000).format(), 0.05, Arc::clone(&telemetry)).unwrap(),
        );
        let control = Arc::new(SessionControl::new());
        let settings = PumpSettings {
            chunk_frames: 2_000,
            limit_frames: None,
            backoff: Duration::from_millis(1),
        };

        let pump = {
            let (ring, control) = (Arc::clone(&ring), Arc::clone(&control));
            std::thread::spawn(move || run_render_pump(engine(4_000), ring, control, settings))
        };
        let bytes = drain_all(&ring);
        pump.join().unwrap();

        assert_eq!(bytes, as_bytes(&expected_samples(1, 1, 0, 4_000)));
        assert!(telemetry.snapshot().backpressure_stalls > 0);
    }

    #[test]
    fn test_real_time_playback_never_underruns() {
        // 1 s at 8 kHz mono through a 0.25 s ring
        let telemetry = Arc::new(Telemetry::new());
        let format = engine(8_000).format();
        let ring = Arc::new(RingBuffer::with_seconds(format, 0.25, Arc::clone(&telemetry)).unwrap());
        let control = Arc::new(SessionControl::new());
        let settings = PumpSettings {
            chunk_frames: 2_000,
            limit_frames: None,
            backoff: Duration::from_millis(1),
        };

        let pump = {
            let (ring, control) = (Arc::clone(&ring), Arc::clone(&control));
            std::thread::spawn(move || run_render_pump(engine(8_000), ring, control, settings))
        };
        let mut sink = RealTimeSink::new(format.byte_rate(), Duration::from_millis(20));
        let started = Instant::now();
        let exit = pump_ring_to_sink(&ring, &mut sink, &telemetry, &control).unwrap();
        let elapsed = started.elapsed();
        pump.join().unwrap();

        assert_eq!(exit, PumpExit::Drained);
        assert_eq!(sink.inner.bytes(), as_bytes(&expected_samples(1, 1, 0, 8_000)));
        assert!(elapsed >= Duration::from_millis(800), "not paced: {elapsed:?}");

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.underruns, 0);
        assert_eq!(snapshot.frames_consumed, 8_000);
        assert!(snapshot.drift.samples > 0);
    }

    #[test]
    fn test_pump_honours_duration_limit() {
        let telemetry = Arc::new(Telemetry::new());
        let ring = Arc::new(
            RingBuffer::with_seconds(engine(100_000).format(), 1.0, Arc::clone(&telemetry)).unwrap(),
        );
        let control = Arc::new(SessionControl::new());
        let settings = PumpSettings {
            chunk_frames: 300,
            limit_frames: Some(1_000),
            backoff: Duration::from_millis(1),
        };

        run_render_pump(engine(100_000), Arc::clone(&ring), control, settings);
        assert!(ring.is_closed());
        assert_eq!(drain_all(&ring).len(), 2_000);
    }

    #[test]
    fn test_cancelled_pump_closes_ring() {
        let telemetry = Arc::new(Telemetry::new());
        let ring = Arc::new(
            RingBuffer::with_seconds(engine(100_000).format(), 0.1, telemetry).unwrap(),
        );
        let control = Arc::new(SessionControl::new());
        control.cancel();
        let settings = PumpSettings {
            chunk_frames: 300,
            limit_frames: None,
            backoff: Duration::from_millis(1),
        };
        run_render_pump(engine(100_000), Arc::clone(&ring), control, settings);
        assert!(ring.is_finished());
    }
}
