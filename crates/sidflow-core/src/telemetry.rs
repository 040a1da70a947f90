//! Passive playback counters.
//!
//! Every component reports into a shared [`Telemetry`]; nothing reads it to
//! make scheduling decisions. Counters are lock-free so the audio consumer can
//! record without contending with the renderer. Drift statistics sit behind a
//! short `parking_lot::Mutex` because they update several fields at once.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running drift statistics in milliseconds.
///
/// Drift is wall-clock time elapsed minus audio time consumed by the sink;
/// positive values mean the sink is behind real time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriftStats {
    /// Number of drift measurements.
    pub samples: u64,
    /// Most recent measurement.
    pub last_ms: f64,
    /// Smallest measurement.
    pub min_ms: f64,
    /// Largest measurement.
    pub max_ms: f64,
}

/// Read-only view of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetrySnapshot {
    /// Frames handed out by the render loop.
    pub frames_produced: u64,
    /// Frames drained from the ring buffer.
    pub frames_consumed: u64,
    /// Empty drains while playing.
    pub underruns: u64,
    /// Producer writes rejected or delayed because the consumer was full.
    pub backpressure_stalls: u64,
    /// Most recently recorded ring occupancy in bytes.
    pub last_occupancy: u64,
    /// Smallest recorded ring occupancy in bytes (0 if none recorded).
    pub min_occupancy: u64,
    /// Largest recorded ring occupancy in bytes.
    pub max_occupancy: u64,
    /// Drift statistics.
    pub drift: DriftStats,
}

/// Shared telemetry recorder
#[derive(Debug)]
pub struct Telemetry {
    frames_produced: AtomicU64,
    frames_consumed: AtomicU64,
    underruns: AtomicU64,
    backpressure_stalls: AtomicU64,
    last_occupancy: AtomicU64,
    min_occupancy: AtomicU64,
    max_occupancy: AtomicU64,
    drift: Mutex<DriftStats>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    /// Create a recorder with all counters at zero.
    pub fn new() -> Self {
        Telemetry {
            frames_produced: AtomicU64::new(0),
            frames_consumed: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            backpressure_stalls: AtomicU64::new(0),
            last_occupancy: AtomicU64::new(0),
            // u64::MAX = nothing recorded yet
            min_occupancy: AtomicU64::new(u64::MAX),
            max_occupancy: AtomicU64::new(0),
            drift: Mutex::new(DriftStats::default()),
        }
    }

    /// Record one empty drain while playing.
    pub fn record_underrun(&self) {
        self.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Record frames handed out by the render loop.
    pub fn record_frames_produced(&self, frames: u64) {
        self.frames_produced.fetch_add(frames, Ordering::Relaxed);
    }

    /// Record frames drained by the consumer.
    pub fn record_frames_consumed(&self, frames: u64) {
        self.frames_consumed.fetch_add(frames, Ordering::Relaxed);
    }

    /// Record the current ring occupancy in bytes.
    pub fn record_occupancy(&self, bytes: u64) {
        self.last_occupancy.store(bytes, Ordering::Relaxed);
        self.min_occupancy.fetch_min(bytes, Ordering::Relaxed);
        self.max_occupancy.fetch_max(bytes, Ordering::Relaxed);
    }

    /// Record one producer stall caused by a full consumer.
    pub fn record_backpressure_stall(&self) {
        self.backpressure_stalls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a drift measurement in milliseconds.
    pub fn record_drift(&self, drift_ms: f64) {
        if !drift_ms.is_finite() {
            return;
        }
        let mut drift = self.drift.lock();
        if drift.samples == 0 {
            drift.min_ms = drift_ms;
            drift.max_ms = drift_ms;
        } else {
            drift.min_ms = drift.min_ms.min(drift_ms);
            drift.max_ms = drift.max_ms.max(drift_ms);
        }
        drift.last_ms = drift_ms;
        drift.samples += 1;
    }

    /// Current values of all counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let min = self.min_occupancy.load(Ordering::Relaxed);
        TelemetrySnapshot {
            frames_produced: self.frames_produced.load(Ordering::Relaxed),
            frames_consumed: self.frames_consumed.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            backpressure_stalls: self.backpressure_stalls.load(Ordering::Relaxed),
            last_occupancy: self.last_occupancy.load(Ordering::Relaxed),
            min_occupancy: if min == u64::MAX { 0 } else { min },
            max_occupancy: self.max_occupancy.load(Ordering::Relaxed),
            drift: *self.drift.lock(),
        }
    }

    /// Zero every counter (start of a new session).
    pub fn reset(&self) {
        self.frames_produced.store(0, Ordering::Relaxed);
        self.frames_consumed.store(0, Ordering::Relaxed);
        self.underruns.store(0, Ordering::Relaxed);
        self.backpressure_stalls.store(0, Ordering::Relaxed);
        self.last_occupancy.store(0, Ordering::Relaxed);
        self.min_occupancy.store(u64::MAX, Ordering::Relaxed);
        self.max_occupancy.store(0, Ordering::Relaxed);
        *self.drift.lock() = DriftStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_counters_accumulate() {
        let telemetry = Telemetry::new();
        telemetry.record_frames_produced(100);
        telemetry.record_frames_produced(50);
        telemetry.record_frames_consumed(120);
        telemetry.record_underrun();
        telemetry.record_backpressure_stall();
        telemetry.record_backpressure_stall();

        let snap = telemetry.snapshot();
        assert_eq!(snap.frames_produced, 150);
        assert_eq!(snap.frames_consumed, 120);
        assert_eq!(snap.underruns, 1);
        assert_eq!(snap.backpressure_stalls, 2);
    }

    #[test]
    fn test_occupancy_extremes() {
        let telemetry = Telemetry::new();
        assert_eq!(telemetry.snapshot().min_occupancy, 0);

        for bytes in [400, 100, 900, 300] {
            telemetry.record_occupancy(bytes);
        }
        let snap = telemetry.snapshot();
        assert_eq!(snap.min_occupancy, 100);
        assert_eq!(snap.max_occupancy, 900);
        assert_eq!(snap.last_occupancy, 300);
    }

    #[test]
    fn test_drift_stats() {
        let telemetry = Telemetry::new();
        telemetry.record_drift(12.5);
        telemetry.record_drift(-3.0);
        telemetry.record_drift(f64::NAN);
        telemetry.record_drift(4.25);

        let drift = telemetry.snapshot().drift;
        assert_eq!(drift.samples, 3);
        assert_relative_eq!(drift.min_ms, -3.0);
        assert_relative_eq!(drift.max_ms, 12.5);
        assert_relative_eq!(drift.last_ms, 4.25);
    }

    #[test]
    fn test_reset() {
        let telemetry = Telemetry::new();
        telemetry.record_underrun();
        telemetry.record_occupancy(64);
        telemetry.record_drift(1.0);
        telemetry.reset();
        assert_eq!(telemetry.snapshot(), TelemetrySnapshot::default());
    }
}
