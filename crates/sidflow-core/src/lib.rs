//! Real-time rendering and streaming core for SIDFlow
//!
//! Turns cycles of an emulated 8-bit sound chip into PCM and streams it to a
//! playback sink without gaps, while supporting instant seeking and offline
//! bulk rendering.
//!
//! # Components
//! - [`Engine`]: cycle-batched render loop over an [`EmulatorBackend`], with
//!   cooperative yielding, cancellation and cache-assisted seeking
//! - [`RingBuffer`]: bounded single-producer/single-consumer PCM byte buffer
//!   with backpressure and underrun accounting
//! - [`RenderCache`]: frame-indexed PCM segments with LRU eviction
//! - [`PlaybackHarness`]: pipes rendered PCM into an external player process
//!   with candidate fallback and lifecycle events
//! - [`Telemetry`]: passive counters shared by all of the above
//!
//! # Crate feature flags
//! - `native-audio` (opt-in): [`sink::NativeOutput`], an audio-callback sink
//!   reading from the ring buffer (enables the optional `rodio` dep)
//!
//! # Quick start
//! ## Offline render
//! ```ignore
//! use sidflow::{Engine, EngineConfig};
//!
//! let mut engine = Engine::new(my_backend, EngineConfig::default());
//! engine.load_tune(&std::fs::read("Commando.sid")?)?;
//! let pcm = engine.render_seconds(5.0, Some(20_000))?;
//! sidflow::export::export_wav_chunk("commando.wav", &pcm, engine.format())?;
//! ```
//!
//! ## Real-time playback
//! ```ignore
//! use sidflow::{HarnessConfig, PlaybackHarness, StartOptions};
//!
//! let mut harness = PlaybackHarness::new(|| MyBackend::new(), HarnessConfig::default());
//! harness.on(sidflow::EventKind::Finished, |_| println!("done"));
//! let started = harness.start("Commando.sid", StartOptions::default())?;
//! println!("playing via {} (pid {})", started.command, started.pid);
//! ```

#![warn(missing_docs)]

pub mod cache; // Render Cache
pub mod config; // Engine / harness configuration
pub mod engine; // Render Loop
pub mod export; // Offline WAV export
pub mod harness; // External-process playback
pub mod ring_buffer; // Producer/consumer PCM buffer
pub mod sink; // Playback sinks
pub mod telemetry; // Passive counters

use sidflow_common::BackendError;

/// Error types for rendering and playback operations
#[derive(thiserror::Error, Debug)]
pub enum SidFlowError {
    /// No tune has been loaded into the engine
    #[error("no tune loaded")]
    NotLoaded,

    /// Bytes are not a recognised tune
    #[error("invalid tune format: {0}")]
    InvalidFormat(String),

    /// Programming error such as a zero cycle count
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Every host-player candidate failed to spawn
    #[error("no audio player available (tried: {})", attempts.join("; "))]
    NoPlayerAvailable {
        /// One entry per attempted command, with its failure reason
        attempts: Vec<String>,
    },

    /// The host player process exited unsuccessfully
    #[error("host player exited with {}", describe_exit(*code))]
    HostProcessExit {
        /// Exit code, `None` if terminated by a signal
        code: Option<i32>,
    },

    /// IO error from filesystem or pipe
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio device error
    #[error("Audio device error: {0}")]
    AudioDeviceError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

pub(crate) fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

impl From<BackendError> for SidFlowError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotLoaded => SidFlowError::NotLoaded,
            BackendError::InvalidFormat(msg) => SidFlowError::InvalidFormat(msg),
            BackendError::InvalidArgument(msg) => SidFlowError::InvalidArgument(msg),
            BackendError::Emulation(msg) => SidFlowError::Other(msg),
        }
    }
}

impl From<String> for SidFlowError {
    /// Converts a String into `SidFlowError::Other`.
    ///
    /// Prefer a specific variant (`ConfigError`, `InvalidArgument`, ...) where
    /// the caller needs to tell errors apart.
    fn from(msg: String) -> Self {
        SidFlowError::Other(msg)
    }
}

impl From<&str> for SidFlowError {
    /// Converts a string slice into `SidFlowError::Other`.
    fn from(msg: &str) -> Self {
        SidFlowError::Other(msg.to_string())
    }
}

/// Result type for rendering and playback operations
pub type Result<T> = std::result::Result<T, SidFlowError>;

// Public API exports
pub use cache::{CacheLookup, CacheScope, CacheStats, RenderCache};
pub use config::{CacheConfig, EngineConfig, HarnessConfig};
pub use engine::{Engine, RenderOutcome, RenderReport};
pub use harness::{
    EventBus, EventKind, HarnessEvent, HarnessState, PlaybackHarness, PlayerCandidate,
    SessionControl, StartOptions, StartResult, StartedEvent, SubscriptionId,
};
pub use ring_buffer::{RingBuffer, WriteResult};
pub use sidflow_common::{
    EmulatorBackend, PcmChunk, PcmFormat, PlaybackState, Rendered, TuneInfo,
};
pub use telemetry::{DriftStats, Telemetry, TelemetrySnapshot};
