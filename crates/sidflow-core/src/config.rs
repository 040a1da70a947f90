//! Engine and playback harness configuration.
//!
//! All structs deserialize with defaults for missing fields, so a JSON file
//! only needs to name the values it changes:
//!
//! ```json
//! { "chunk_seconds": 0.1, "engine": { "cycles_per_batch": 10000 } }
//! ```

use crate::harness::PlayerCandidate;
use crate::{Result, SidFlowError};
use serde::{Deserialize, Serialize};
use sidflow_common::DEFAULT_CYCLES_PER_BATCH;
use std::path::Path;

/// Default number of batches between cooperative yields.
pub const DEFAULT_YIELD_EVERY_BATCHES: u32 = 10;

/// Default render cache budget in seconds of PCM.
pub const DEFAULT_CACHE_SECONDS: f64 = 30.0;

/// Default spacing of emulator checkpoints in seconds.
pub const DEFAULT_CHECKPOINT_SECONDS: f64 = 5.0;

/// Default audio rendered per pump iteration in seconds.
pub const DEFAULT_CHUNK_SECONDS: f64 = 0.25;

/// Default ring buffer size in seconds of PCM.
pub const DEFAULT_RING_BUFFER_SECONDS: f64 = 1.0;

/// Producer back-off while the ring buffer is full, in microseconds.
pub const BUFFER_BACKOFF_MICROS: u64 = 2_000;

/// Render cache budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Budget in seconds of PCM at the session format.
    pub budget_seconds: f64,
    /// Explicit byte budget; overrides `budget_seconds` when set.
    pub budget_bytes: Option<usize>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_seconds: DEFAULT_CACHE_SECONDS,
            budget_bytes: None,
        }
    }
}

impl CacheConfig {
    /// A cache that never stores anything.
    pub fn disabled() -> Self {
        Self {
            budget_seconds: 0.0,
            budget_bytes: Some(0),
        }
    }
}

/// Render loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Emulated cycles per backend call.
    pub cycles_per_batch: u32,
    /// Batches between calls to the yield hook.
    pub yield_every_batches: u32,
    /// Spacing of emulator checkpoints; `0` disables checkpoints.
    pub checkpoint_interval_seconds: f64,
    /// Render cache budget.
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycles_per_batch: DEFAULT_CYCLES_PER_BATCH,
            yield_every_batches: DEFAULT_YIELD_EVERY_BATCHES,
            checkpoint_interval_seconds: DEFAULT_CHECKPOINT_SECONDS,
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Check values that would make the render loop misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.cycles_per_batch == 0 {
            return Err(SidFlowError::ConfigError(
                "cycles_per_batch must be greater than 0".into(),
            ));
        }
        if self.yield_every_batches == 0 {
            return Err(SidFlowError::ConfigError(
                "yield_every_batches must be greater than 0".into(),
            ));
        }
        if !self.checkpoint_interval_seconds.is_finite() || self.checkpoint_interval_seconds < 0.0
        {
            return Err(SidFlowError::ConfigError(format!(
                "checkpoint_interval_seconds must be a non-negative number, got {}",
                self.checkpoint_interval_seconds
            )));
        }
        if !self.cache.budget_seconds.is_finite() || self.cache.budget_seconds < 0.0 {
            return Err(SidFlowError::ConfigError(format!(
                "cache budget_seconds must be a non-negative number, got {}",
                self.cache.budget_seconds
            )));
        }
        Ok(())
    }
}

/// Playback harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Audio rendered per pump iteration.
    pub chunk_seconds: f64,
    /// Ring buffer size between the render pump and the sink writer.
    pub ring_buffer_seconds: f64,
    /// Producer back-off while the ring buffer is full.
    pub backoff_micros: u64,
    /// Host players, tried in order.
    pub candidates: Vec<PlayerCandidate>,
    /// Render loop settings for each session.
    pub engine: EngineConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: DEFAULT_CHUNK_SECONDS,
            ring_buffer_seconds: DEFAULT_RING_BUFFER_SECONDS,
            backoff_micros: BUFFER_BACKOFF_MICROS,
            candidates: PlayerCandidate::defaults(),
            engine: EngineConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Default configuration with a custom candidate list.
    pub fn with_candidates(candidates: Vec<PlayerCandidate>) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SidFlowError::ConfigError(format!("malformed harness config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check values that would make the harness misbehave.
    pub fn validate(&self) -> Result<()> {
        if !self.chunk_seconds.is_finite() || self.chunk_seconds <= 0.0 {
            return Err(SidFlowError::ConfigError(format!(
                "chunk_seconds must be positive, got {}",
                self.chunk_seconds
            )));
        }
        if !self.ring_buffer_seconds.is_finite() || self.ring_buffer_seconds <= 0.0 {
            return Err(SidFlowError::ConfigError(format!(
                "ring_buffer_seconds must be positive, got {}",
                self.ring_buffer_seconds
            )));
        }
        self.engine.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(HarnessConfig::default().validate().is_ok());
        assert_eq!(HarnessConfig::default().candidates.len(), 3);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HarnessConfig::from_json_str(
            r#"{ "chunk_seconds": 0.1, "engine": { "cycles_per_batch": 10000 } }"#,
        )
        .unwrap();
        assert_eq!(config.chunk_seconds, 0.1);
        assert_eq!(config.engine.cycles_per_batch, 10_000);
        assert_eq!(config.engine.yield_every_batches, DEFAULT_YIELD_EVERY_BATCHES);
        assert_eq!(config.ring_buffer_seconds, DEFAULT_RING_BUFFER_SECONDS);
    }

    #[test]
    fn test_candidates_from_json() {
        let config = HarnessConfig::from_json_str(
            r#"{ "candidates": [ { "program": "pw-cat", "args": ["--playback", "-"] } ] }"#,
        )
        .unwrap();
        assert_eq!(config.candidates.len(), 1);
        assert_eq!(config.candidates[0].program, "pw-cat");
    }

    #[test]
    fn test_rejects_zero_batch() {
        let err = HarnessConfig::from_json_str(r#"{ "engine": { "cycles_per_batch": 0 } }"#)
            .unwrap_err();
        assert!(err.to_string().contains("cycles_per_batch"));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let err = HarnessConfig::from_json_str("{ chunk_seconds: }").unwrap_err();
        assert!(matches!(err, SidFlowError::ConfigError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.json");
        std::fs::write(&path, r#"{ "ring_buffer_seconds": 2.0 }"#).unwrap();
        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.ring_buffer_seconds, 2.0);
    }
}
