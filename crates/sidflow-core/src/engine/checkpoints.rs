//! Emulator state checkpoints for coarse seeking.

use std::collections::BTreeMap;

/// Snapshots keyed by the frame the emulator was positioned at.
#[derive(Debug)]
pub(crate) struct Checkpoints<S> {
    interval_frames: u64,
    next_due: u64,
    states: BTreeMap<u64, S>,
}

impl<S> Checkpoints<S> {
    /// `interval_frames == 0` disables recording.
    pub(crate) fn new(interval_frames: u64) -> Self {
        Self {
            interval_frames,
            next_due: interval_frames,
            states: BTreeMap::new(),
        }
    }

    pub(crate) fn set_interval(&mut self, interval_frames: u64) {
        self.interval_frames = interval_frames;
        self.clear();
    }

    pub(crate) fn clear(&mut self) {
        self.states.clear();
        self.next_due = self.interval_frames;
    }

    /// Whether a snapshot should be taken with the emulator at `frame`.
    pub(crate) fn is_due(&self, frame: u64) -> bool {
        self.interval_frames > 0 && frame >= self.next_due
    }

    pub(crate) fn record(&mut self, frame: u64, state: S) {
        self.states.insert(frame, state);
        self.resume_from(frame);
    }

    /// Reschedule after the emulator jumped to `frame`.
    pub(crate) fn resume_from(&mut self, frame: u64) {
        self.next_due = frame + self.interval_frames;
    }

    /// Latest checkpoint at or before `frame`.
    pub(crate) fn nearest(&self, frame: u64) -> Option<(u64, &S)> {
        self.states
            .range(..=frame)
            .next_back()
            .map(|(at, state)| (*at, state))
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_and_nearest() {
        let mut checkpoints = Checkpoints::new(100);
        assert!(!checkpoints.is_due(99));
        assert!(checkpoints.is_due(105));
        checkpoints.record(105, "a");
        assert!(!checkpoints.is_due(200));
        assert!(checkpoints.is_due(205));
        checkpoints.record(210, "b");

        assert_eq!(checkpoints.nearest(50), None);
        assert_eq!(checkpoints.nearest(105), Some((105, &"a")));
        assert_eq!(checkpoints.nearest(209), Some((105, &"a")));
        assert_eq!(checkpoints.nearest(10_000), Some((210, &"b")));
    }

    #[test]
    fn test_disabled() {
        let checkpoints: Checkpoints<()> = Checkpoints::new(0);
        assert!(!checkpoints.is_due(1_000_000));
    }
}
