//! Ring buffer between the render loop and the playback sink
//!
//! A ring buffer (circular buffer) decouples two execution contexts:
//! - Producer: the render loop, which must never block on a full buffer
//! - Consumer: the sink writer or audio callback, which may wait for data
//!
//! Memory consumption is fixed at the byte capacity regardless of duration.
//! Storage is protected by a `parking_lot::Mutex` that is held only for the
//! copy; the monotonic write/drain counters are atomics so occupancy can be
//! read from any thread without taking the lock.

use crate::telemetry::Telemetry;
use crate::{Result, SidFlowError};
use parking_lot::{Condvar, Mutex};
use sidflow_common::{PcmChunk, PcmFormat};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest capacity accepted by [`RingBuffer::new`] (512 MiB).
pub const MAX_CAPACITY_BYTES: usize = 512 * 1024 * 1024;

/// Outcome of [`RingBuffer::try_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// All bytes were copied in.
    Accepted,
    /// Not enough room; nothing was written.
    Rejected {
        /// Free bytes at the time of the attempt.
        free: usize,
    },
    /// The buffer was closed for writing.
    Closed,
}

impl WriteResult {
    /// Whether the write went through.
    pub fn is_accepted(&self) -> bool {
        matches!(self, WriteResult::Accepted)
    }
}

/// Ring buffer for streaming PCM bytes
///
/// # Thread Safety
/// - Exactly one producer (render loop) and one consumer (sink)
/// - `bytes_written` / `bytes_drained` only ever grow; occupancy is their
///   difference and never exceeds the capacity
/// - Writes are all-or-nothing and never block; drains may wait on a condvar
#[derive(Debug)]
pub struct RingBuffer {
    /// Shared byte storage
    storage: Mutex<Vec<u8>>,
    /// Total bytes accepted from the producer
    written: AtomicU64,
    /// Total bytes handed to the consumer
    drained: AtomicU64,
    capacity: usize,
    format: PcmFormat,
    frame_bytes: usize,
    /// Empty drains count as underruns only while set
    playing: AtomicBool,
    /// No more writes will arrive
    closed: AtomicBool,
    signal: Mutex<()>,
    data_ready: Condvar,
    space_ready: Condvar,
    telemetry: Arc<Telemetry>,
}

impl RingBuffer {
    /// Create a ring buffer holding `capacity_bytes` of PCM in `format`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - the capacity is 0
    /// - the capacity exceeds [`MAX_CAPACITY_BYTES`]
    /// - the capacity is not a whole number of frames
    pub fn new(capacity_bytes: usize, format: PcmFormat, telemetry: Arc<Telemetry>) -> Result<Self> {
        if capacity_bytes == 0 {
            return Err(SidFlowError::ConfigError(
                "Ring buffer capacity must be greater than 0".into(),
            ));
        }
        if capacity_bytes > MAX_CAPACITY_BYTES {
            return Err(SidFlowError::ConfigError(format!(
                "Ring buffer capacity {capacity_bytes} exceeds maximum safe size {MAX_CAPACITY_BYTES}"
            )));
        }
        let frame_bytes = format.frame_bytes();
        if frame_bytes == 0 || capacity_bytes % frame_bytes != 0 {
            return Err(SidFlowError::ConfigError(format!(
                "Ring buffer capacity {capacity_bytes} is not a multiple of the {frame_bytes}-byte frame size"
            )));
        }

        Ok(RingBuffer {
            storage: Mutex::new(vec![0; capacity_bytes]),
            written: AtomicU64::new(0),
            drained: AtomicU64::new(0),
            capacity: capacity_bytes,
            format,
            frame_bytes,
            playing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            signal: Mutex::new(()),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            telemetry,
        })
    }

    /// Create a ring buffer holding `seconds` of audio in `format`.
    pub fn with_seconds(format: PcmFormat, seconds: f64, telemetry: Arc<Telemetry>) -> Result<Self> {
        Self::new(format.bytes_for_seconds(seconds), format, telemetry)
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// PCM format of the buffered bytes.
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Bytes per interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Bytes currently buffered.
    pub fn occupancy(&self) -> usize {
        let drained = self.drained.load(Ordering::Acquire);
        let written = self.written.load(Ordering::Acquire);
        written.saturating_sub(drained) as usize
    }

    /// Bytes that can be written without rejection.
    pub fn free_space(&self) -> usize {
        self.capacity - self.occupancy()
    }

    /// Total bytes ever accepted.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    /// Total bytes ever drained.
    pub fn bytes_drained(&self) -> u64 {
        self.drained.load(Ordering::Acquire)
    }

    /// Get fill percentage (0.0 to 1.0)
    pub fn fill_percentage(&self) -> f32 {
        self.occupancy() as f32 / self.capacity as f32
    }

    /// Mark the session as playing (empty drains count as underruns) or not.
    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    /// Whether empty drains currently count as underruns.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Signal that the producer has finished; wakes any waiting consumer.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify_all();
    }

    /// Whether the producer has finished.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closed and fully drained: the consumer will never see more data.
    pub fn is_finished(&self) -> bool {
        self.is_closed() && self.occupancy() == 0
    }

    /// Write all of `bytes` or nothing (producer). Never blocks.
    ///
    /// A rejection is recorded as a backpressure stall; the producer is
    /// expected to back off and retry rather than drop data.
    pub fn try_write(&self, bytes: &[u8]) -> WriteResult {
        if self.is_closed() {
            return WriteResult::Closed;
        }
        if bytes.is_empty() {
            return WriteResult::Accepted;
        }

        let mut storage = self.storage.lock();

        // Calculate free space while holding the lock (prevents TOCTOU race)
        let written = self.written.load(Ordering::Acquire);
        let drained = self.drained.load(Ordering::Acquire);
        let occupancy = (written - drained) as usize;
        let free = self.capacity - occupancy;

        if bytes.len() > free {
            drop(storage);
            self.telemetry.record_backpressure_stall();
            return WriteResult::Rejected { free };
        }

        let write_idx = (written % self.capacity as u64) as usize;
        let len = bytes.len();
        if write_idx + len <= self.capacity {
            storage[write_idx..write_idx + len].copy_from_slice(bytes);
        } else {
            // Wrap-around write
            let first_part = self.capacity - write_idx;
            storage[write_idx..].copy_from_slice(&bytes[..first_part]);
            storage[..len - first_part].copy_from_slice(&bytes[first_part..]);
        }
        self.written.store(written + len as u64, Ordering::Release);
        drop(storage);

        self.telemetry.record_occupancy((occupancy + len) as u64);
        let _guard = self.signal.lock();
        self.data_ready.notify_one();
        WriteResult::Accepted
    }

    /// Write a chunk's samples as little-endian bytes.
    pub fn try_write_chunk(&self, chunk: &PcmChunk) -> WriteResult {
        self.try_write(&chunk.to_le_bytes())
    }

    /// Copy up to `dest.len()` bytes out (consumer). Returns 0 if empty.
    ///
    /// An empty drain while playing is recorded as exactly one underrun.
    pub fn drain(&self, dest: &mut [u8]) -> usize {
        self.drain_inner(dest, true)
    }

    /// Like [`drain`](Self::drain), but waits up to `timeout` for data.
    ///
    /// Returns early when the buffer is closed. An empty buffer at the time
    /// of the call counts as one underrun regardless of how long the wait is.
    pub fn drain_blocking(&self, dest: &mut [u8], timeout: Duration) -> usize {
        let copied = self.drain_inner(dest, true);
        if copied > 0 || dest.is_empty() || self.is_closed() {
            return copied;
        }

        let deadline = Instant::now() + timeout;
        let mut guard = self.signal.lock();
        while self.occupancy() == 0 && !self.is_closed() {
            if self.data_ready.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        drop(guard);

        self.drain_inner(dest, false)
    }

    /// Wait up to `timeout` until at least `bytes` of free space exist.
    ///
    /// Returns `true` if the space is available.
    pub fn wait_for_space(&self, bytes: usize, timeout: Duration) -> bool {
        let bytes = bytes.min(self.capacity);
        if self.free_space() >= bytes {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.signal.lock();
        while self.free_space() < bytes && !self.is_closed() {
            if self.space_ready.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.free_space() >= bytes
    }

    /// Discard everything buffered (stop / flush). Counters stay monotonic.
    pub fn clear(&self) {
        let _storage = self.storage.lock();
        let written = self.written.load(Ordering::Acquire);
        self.drained.store(written, Ordering::Release);
        drop(_storage);
        self.telemetry.record_occupancy(0);
        self.notify_all();
    }

    fn drain_inner(&self, dest: &mut [u8], count_underrun: bool) -> usize {
        if dest.is_empty() {
            return 0;
        }
        let storage = self.storage.lock();

        // Calculate available data while holding the lock (prevents TOCTOU race)
        let written = self.written.load(Ordering::Acquire);
        let drained = self.drained.load(Ordering::Acquire);
        let available = (written - drained) as usize;

        if available == 0 {
            drop(storage);
            // End of stream is not an underrun
            if count_underrun && self.is_playing() && !self.is_closed() {
                self.telemetry.record_underrun();
            }
            return 0;
        }

        let to_read = dest.len().min(available);
        let read_idx = (drained % self.capacity as u64) as usize;
        if read_idx + to_read <= self.capacity {
            dest[..to_read].copy_from_slice(&storage[read_idx..read_idx + to_read]);
        } else {
            // Wrap-around read
            let first_part = self.capacity - read_idx;
            dest[..first_part].copy_from_slice(&storage[read_idx..]);
            dest[first_part..to_read].copy_from_slice(&storage[..to_read - first_part]);
        }
        let new_drained = drained + to_read as u64;
        self.drained.store(new_drained, Ordering::Release);
        drop(storage);

        // Whole frames only; a split frame is counted once its last byte leaves
        let fb = self.frame_bytes as u64;
        self.telemetry
            .record_frames_consumed(new_drained / fb - drained / fb);
        self.telemetry.record_occupancy((available - to_read) as u64);

        let _guard = self.signal.lock();
        self.space_ready.notify_one();
        to_read
    }

    fn notify_all(&self) {
        let _guard = self.signal.lock();
        self.data_ready.notify_all();
        self.space_ready.notify_all();
    }
}
