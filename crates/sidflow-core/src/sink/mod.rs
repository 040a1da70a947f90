//! Playback sinks
//!
//! A sink is the consumer end of a session: something that accepts s16le PCM
//! bytes at (roughly) real-time pace. Writes may be accepted only in part when
//! the sink is full; the caller then waits for it to drain and continues with
//! the remainder. Nothing is ever dropped or replaced with silence on that
//! path.

mod memory;
#[cfg(feature = "native-audio")]
mod native;
mod pipe;
mod pump;

pub use memory::MemorySink;
#[cfg(feature = "native-audio")]
pub use native::NativeOutput;
pub use pipe::PipeSink;
pub use pump::{PumpExit, pump_ring_to_sink, pump_ring_to_sink_until};

use crate::telemetry::Telemetry;
use std::io;

/// Outcome of a single [`PlaybackSink::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkWrite {
    /// Every byte was taken.
    Accepted,
    /// Only the first `n` bytes were taken.
    Partial(usize),
}

/// Consumer of rendered PCM bytes
pub trait PlaybackSink: Send {
    /// Offer bytes to the sink.
    fn write(&mut self, bytes: &[u8]) -> io::Result<SinkWrite>;

    /// Block until the sink can take more data.
    fn wait_drained(&mut self) -> io::Result<()>;

    /// Signal end of input. Further writes fail.
    fn close(&mut self) -> io::Result<()>;
}

/// Write all of `bytes`, waiting for the sink to drain after each partial
/// write. Each wait is recorded as a backpressure stall.
pub fn write_with_backpressure<S>(sink: &mut S, bytes: &[u8], telemetry: &Telemetry) -> io::Result<()>
where
    S: PlaybackSink + ?Sized,
{
    let mut offset = 0;
    while offset < bytes.len() {
        match sink.write(&bytes[offset..])? {
            SinkWrite::Accepted => return Ok(()),
            SinkWrite::Partial(n) => {
                offset += n;
                telemetry.record_backpressure_stall();
                sink.wait_drained()?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backpressure_delivers_everything_in_order() {
        let telemetry = Telemetry::new();
        let mut sink = MemorySink::with_capacity(5);
        let payload: Vec<u8> = (0..23).collect();

        write_with_backpressure(&mut sink, &payload, &telemetry).unwrap();
        sink.close().unwrap();

        assert_eq!(sink.bytes(), payload);
        assert_eq!(telemetry.snapshot().backpressure_stalls, 4);
    }

    #[test]
    fn test_unbounded_sink_never_stalls() {
        let telemetry = Telemetry::new();
        let mut sink = MemorySink::new();
        write_with_backpressure(&mut sink, &[1; 4096], &telemetry).unwrap();
        assert_eq!(sink.bytes().len(), 4096);
        assert_eq!(telemetry.snapshot().backpressure_stalls, 0);
    }
}
