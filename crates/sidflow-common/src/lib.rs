//! Common traits and types for SIDFlow emulation backends.
//!
//! This crate provides the boundary between the rendering pipeline and the
//! opaque chip emulator that produces the audio.
//!
//! # Types
//!
//! - [`EmulatorBackend`] - Stateful "advance by N cycles" emulator interface
//! - [`PcmChunk`] - Immutable run of interleaved 16-bit samples with a frame offset
//! - [`PcmFormat`] - Sample rate and channel count of a session
//! - [`TuneInfo`] - Metadata reported by the backend for a loaded tune
//!
//! # Example
//!
//! ```ignore
//! use sidflow_common::{EmulatorBackend, Rendered};
//!
//! fn render_all<B: EmulatorBackend>(backend: &mut B) -> Vec<i16> {
//!     let mut pcm = Vec::new();
//!     while let Ok(Rendered::Samples(batch)) = backend.render_cycles(20_000) {
//!         pcm.extend_from_slice(&batch);
//!     }
//!     pcm
//! }
//! ```

#![warn(missing_docs)]

mod backend;
mod metadata;
mod pcm;
mod state;

/// Deterministic mock backend for tests.
///
/// Only available when compiling this crate's own tests, or when the
/// `test-utils` feature is enabled. Not part of the stable API.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{BackendError, EmulatorBackend, Rendered};
pub use metadata::TuneInfo;
pub use pcm::{BYTES_PER_SAMPLE, PcmChunk, PcmFormat};
pub use state::PlaybackState;

// ============================================================================
// Common Constants
// ============================================================================

/// Standard audio sample rate (44.1 kHz CD quality).
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// PAL C64 system clock in Hz.
pub const PAL_CLOCK_HZ: u32 = 985_248;

/// NTSC C64 system clock in Hz.
pub const NTSC_CLOCK_HZ: u32 = 1_022_727;

/// Default number of emulated cycles per backend call.
///
/// Roughly 20 ms of PAL time, so one batch completes well inside a video frame.
pub const DEFAULT_CYCLES_PER_BATCH: u32 = 20_000;
