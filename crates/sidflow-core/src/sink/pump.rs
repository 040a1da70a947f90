use super::{PlaybackSink, write_with_backpressure};
use crate::harness::SessionControl;
use crate::ring_buffer::RingBuffer;
use crate::telemetry::Telemetry;
use std::io;
use std::time::{Duration, Instant};

const DRAIN_WAIT: Duration = Duration::from_millis(50);

/// Why [`pump_ring_to_sink`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The ring was closed and everything in it reached the sink.
    Drained,
    /// The session was cancelled.
    Cancelled,
    /// The consumer behind the sink went away while paused.
    SinkGone,
}

/// Move PCM from `ring` to `sink` until the ring is finished or the session
/// is cancelled.
///
/// While paused nothing is drained, so the buffered position is kept for the
/// resume. Drift (wall time minus audio time handed to the sink, excluding
/// pauses) is recorded after every write.
pub fn pump_ring_to_sink<S>(
    ring: &RingBuffer,
    sink: &mut S,
    telemetry: &Telemetry,
    control: &SessionControl,
) -> io::Result<PumpExit>
where
    S: PlaybackSink + ?Sized,
{
    pump_ring_to_sink_until(ring, sink, telemetry, control, || false)
}

/// [`pump_ring_to_sink`] that also gives up once `sink_gone` returns `true`.
///
/// A paused pump writes nothing, so a consumer that dies meanwhile never
/// shows up as a failed write. `sink_gone` is polled every
/// few tens of milliseconds for as long as the session stays paused.
pub fn pump_ring_to_sink_until<S, F>(
    ring: &RingBuffer,
    sink: &mut S,
    telemetry: &Telemetry,
    control: &SessionControl,
    mut sink_gone: F,
) -> io::Result<PumpExit>
where
    S: PlaybackSink + ?Sized,
    F: FnMut() -> bool,
{
    let frame_bytes = ring.frame_bytes();
    let block = ((ring.capacity() / 4) / frame_bytes).max(1) * frame_bytes;
    let mut buf = vec![0u8; block];

    let byte_rate = ring.format().byte_rate() as f64;
    let started = Instant::now();
    let mut paused_for = Duration::ZERO;
    let mut delivered: u64 = 0;

    loop {
        if control.is_cancelled() {
            return Ok(PumpExit::Cancelled);
        }
        if control.is_paused() {
            let pause_started = Instant::now();
            while control.wait_while_paused(DRAIN_WAIT) {
                if sink_gone() {
                    return Ok(PumpExit::SinkGone);
                }
            }
            paused_for += pause_started.elapsed();
            continue;
        }

        let n = ring.drain_blocking(&mut buf, DRAIN_WAIT);
        if n == 0 {
            if ring.is_finished() {
                return Ok(PumpExit::Drained);
            }
            continue;
        }

        write_with_backpressure(sink, &buf[..n], telemetry)?;
        delivered += n as u64;

        let audio_ms = delivered as f64 * 1000.0 / byte_rate;
        let wall_ms = started.elapsed().saturating_sub(paused_for).as_secs_f64() * 1000.0;
        telemetry.record_drift(wall_ms - audio_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use sidflow_common::PcmFormat;
    use std::sync::Arc;

    fn ring(capacity: usize, telemetry: &Arc<Telemetry>) -> Arc<RingBuffer> {
        Arc::new(RingBuffer::new(capacity, PcmFormat::new(8_000, 1), Arc::clone(telemetry)).unwrap())
    }

    #[test]
    fn test_drains_everything_then_exits() {
        let telemetry = Arc::new(Telemetry::new());
        let rb = ring(64, &telemetry);
        let control = SessionControl::new();

        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let producer = {
            let rb = Arc::clone(&rb);
            let payload = payload.clone();
            std::thread::spawn(move || {
                for piece in payload.chunks(16) {
                    while !rb.try_write(piece).is_accepted() {
                        rb.wait_for_space(piece.len(), Duration::from_millis(5));
                    }
                }
                rb.close();
            })
        };

        let mut sink = MemorySink::with_capacity(10);
        let exit = pump_ring_to_sink(&rb, &mut sink, &telemetry, &control).unwrap();
        producer.join().unwrap();

        assert_eq!(exit, PumpExit::Drained);
        assert_eq!(sink.bytes(), payload);
        assert!(telemetry.snapshot().drift.samples > 0);
    }

    #[test]
    fn test_cancel_stops_pump() {
        let telemetry = Arc::new(Telemetry::new());
        let rb = ring(64, &telemetry);
        let control = SessionControl::new();
        control.cancel();

        let mut sink = MemorySink::new();
        let exit = pump_ring_to_sink(&rb, &mut sink, &telemetry, &control).unwrap();
        assert_eq!(exit, PumpExit::Cancelled);
    }

    #[test]
    fn test_pause_holds_data_in_ring() {
        let telemetry = Arc::new(Telemetry::new());
        let rb = ring(64, &telemetry);
        let control = Arc::new(SessionControl::new());
        control.set_paused(true);
        assert!(rb.try_write(&[7; 8]).is_accepted());
        rb.close();

        let consumer = {
            let rb = Arc::clone(&rb);
            let control = Arc::clone(&control);
            let telemetry = Arc::clone(&telemetry);
            std::thread::spawn(move || {
                let mut sink = MemorySink::new();
                let exit = pump_ring_to_sink(&rb, &mut sink, &telemetry, &control).unwrap();
                (exit, sink.bytes())
            })
        };

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(rb.occupancy(), 8);
        control.set_paused(false);

        let (exit, bytes) = consumer.join().unwrap();
        assert_eq!(exit, PumpExit::Drained);
        assert_eq!(bytes, vec![7; 8]);
    }

    #[test]
    fn test_sink_gone_while_paused_ends_pump() {
        let telemetry = Arc::new(Telemetry::new());
        let rb = ring(64, &telemetry);
        let control = SessionControl::new();
        control.set_paused(true);
        assert!(rb.try_write(&[1; 8]).is_accepted());

        let mut polls = 0;
        let mut sink = MemorySink::new();
        let exit = pump_ring_to_sink_until(&rb, &mut sink, &telemetry, &control, || {
            polls += 1;
            polls == 3
        })
        .unwrap();

        assert_eq!(exit, PumpExit::SinkGone);
        assert_eq!(polls, 3);
        assert!(sink.bytes().is_empty());
        assert_eq!(rb.occupancy(), 8);
    }

    #[test]
    fn test_sink_gone_is_not_polled_while_playing() {
        let telemetry = Arc::new(Telemetry::new());
        let rb = ring(64, &telemetry);
        let control = SessionControl::new();
        assert!(rb.try_write(&[2; 16]).is_accepted());
        rb.close();

        let mut sink = MemorySink::new();
        let exit =
            pump_ring_to_sink_until(&rb, &mut sink, &telemetry, &control, || unreachable!()).unwrap();
        assert_eq!(exit, PumpExit::Drained);
        assert_eq!(sink.bytes(), vec![2; 16]);
    }
}
