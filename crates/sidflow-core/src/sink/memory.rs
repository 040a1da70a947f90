use super::{PlaybackSink, SinkWrite};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;

/// In-memory sink for offline capture and tests.
///
/// With a capacity it behaves like a pipe with that much buffer space: writes
/// beyond the free space are accepted partially until
/// [`wait_drained`](PlaybackSink::wait_drained) moves the in-flight bytes into
/// the captured output.
#[derive(Debug, Default)]
pub struct MemorySink {
    captured: Arc<Mutex<Vec<u8>>>,
    in_flight: Vec<u8>,
    capacity: Option<usize>,
    closed: bool,
}

impl MemorySink {
    /// Unbounded sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that holds at most `capacity` undrained bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::default()
        }
    }

    /// Shared handle to the captured bytes, usable after the sink has been
    /// moved to another thread.
    pub fn handle(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.captured)
    }

    /// Copy of everything written so far, in order.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = self.captured.lock().clone();
        out.extend_from_slice(&self.in_flight);
        out
    }

    /// Whether [`close`](PlaybackSink::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn flush_in_flight(&mut self) {
        self.captured.lock().append(&mut self.in_flight);
    }
}

impl PlaybackSink for MemorySink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<SinkWrite> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory sink closed"));
        }
        let Some(capacity) = self.capacity else {
            self.captured.lock().extend_from_slice(bytes);
            return Ok(SinkWrite::Accepted);
        };

        let free = capacity.saturating_sub(self.in_flight.len());
        let take = free.min(bytes.len());
        self.in_flight.extend_from_slice(&bytes[..take]);
        if take == bytes.len() {
            Ok(SinkWrite::Accepted)
        } else {
            Ok(SinkWrite::Partial(take))
        }
    }

    fn wait_drained(&mut self) -> io::Result<()> {
        self.flush_in_flight();
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.flush_in_flight();
        self.closed = true;
        Ok(())
    }
}
