//! Emulator backend trait abstraction.
//!
//! The chip emulator is an opaque, stateful black box. The rendering pipeline
//! only ever asks it to advance by a number of cycles and hand back the PCM
//! produced in that time. Nothing here assumes re-entrancy or random access.

use crate::{PcmFormat, TuneInfo};

/// Errors reported across the emulator boundary.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No tune has been loaded yet.
    #[error("no tune loaded")]
    NotLoaded,

    /// The supplied bytes are not a tune this backend understands.
    #[error("invalid tune format: {0}")]
    InvalidFormat(String),

    /// Caller passed an out-of-range value (zero cycles, bad song index).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The emulation itself failed.
    #[error("emulation failure: {0}")]
    Emulation(String),
}

/// Result of one `render_cycles` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Interleaved samples produced while advancing.
    Samples(Vec<i16>),
    /// The tune has ended; no further samples will be produced.
    EndOfStream,
}

/// Common interface for chip emulator backends
///
/// Implementations must be deterministic: for a given tune, selected song and
/// sequence of `render_cycles` calls, the produced samples are identical
/// across runs. The render cache relies on this.
///
/// # Example
///
/// ```ignore
/// use sidflow_common::{EmulatorBackend, Rendered};
///
/// fn first_batch<B: EmulatorBackend>(backend: &mut B, tune: &[u8]) -> Vec<i16> {
///     backend.load_tune(tune).unwrap();
///     match backend.render_cycles(20_000).unwrap() {
///         Rendered::Samples(pcm) => pcm,
///         Rendered::EndOfStream => Vec::new(),
///     }
/// }
/// ```
pub trait EmulatorBackend: Send {
    /// Opaque emulator state captured by [`snapshot`](Self::snapshot).
    ///
    /// Backends without snapshot support use `()`.
    type Snapshot: Clone + Send;

    /// Load a tune and select its default song.
    ///
    /// Fails with [`BackendError::InvalidFormat`] if the bytes are not a
    /// recognised tune.
    fn load_tune(&mut self, data: &[u8]) -> Result<TuneInfo, BackendError>;

    /// Metadata of the loaded tune, if any.
    fn tune_info(&self) -> Option<&TuneInfo>;

    /// Select a song by 1-based index and rewind emulation to its start.
    fn select_song(&mut self, index: u16) -> Result<(), BackendError>;

    /// Advance emulated time by `cycles` and return the PCM produced.
    ///
    /// Fails with [`BackendError::NotLoaded`] without a tune and with
    /// [`BackendError::InvalidArgument`] for zero cycles. Never blocks; cost
    /// is proportional to `cycles`.
    fn render_cycles(&mut self, cycles: u32) -> Result<Rendered, BackendError>;

    /// Output format (fixed for the lifetime of a loaded tune).
    fn format(&self) -> PcmFormat;

    /// Emulated clock frequency in cycles per second.
    fn clock_hz(&self) -> u32 {
        crate::PAL_CLOCK_HZ
    }

    /// Capture the current emulator state, if supported.
    ///
    /// Default returns `None` (no checkpoint support).
    fn snapshot(&self) -> Option<Self::Snapshot> {
        None
    }

    /// Restore a state previously returned by [`snapshot`](Self::snapshot).
    ///
    /// Returns `true` if the backend is now positioned at the snapshot.
    fn restore(&mut self, _snapshot: &Self::Snapshot) -> bool {
        false
    }
}
