//! Flags shared between the harness, its render pump and its sink writer.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Pause/stop/failure signals for one playback session.
#[derive(Debug, Default)]
pub struct SessionControl {
    cancel: Arc<AtomicBool>,
    paused: AtomicBool,
    stopped_by_caller: AtomicBool,
    failure: Mutex<Option<String>>,
    signal: Mutex<()>,
    resumed: Condvar,
}

impl SessionControl {
    /// Fresh, running session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token the render loop checks at every batch boundary.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Ask every session thread to wind down.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
        self.wake();
    }

    /// Whether the session is winding down.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Logical pause: threads stop moving data but stay alive.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        if !paused {
            self.wake();
        }
    }

    /// Whether the session is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Block while paused, for at most `timeout`.
    ///
    /// Returns `true` if still paused (and not cancelled) afterwards.
    pub fn wait_while_paused(&self, timeout: Duration) -> bool {
        let mut guard = self.signal.lock();
        if self.is_paused() && !self.is_cancelled() {
            self.resumed.wait_for(&mut guard, timeout);
        }
        self.is_paused() && !self.is_cancelled()
    }

    /// Record that the caller stopped the session; no exit event follows.
    pub fn mark_stopped_by_caller(&self) {
        self.stopped_by_caller.store(true, Ordering::Release);
    }

    /// Whether [`mark_stopped_by_caller`](Self::mark_stopped_by_caller) was called.
    pub fn stopped_by_caller(&self) -> bool {
        self.stopped_by_caller.load(Ordering::Acquire)
    }

    /// Record a fatal error from a session thread. The first one wins.
    pub fn fail(&self, message: impl Into<String>) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(message.into());
        }
    }

    /// Take the recorded failure, if any.
    pub fn take_failure(&self) -> Option<String> {
        self.failure.lock().take()
    }

    fn wake(&self) {
        let _guard = self.signal.lock();
        self.resumed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_resume_wakes_waiter() {
        let control = Arc::new(SessionControl::new());
        control.set_paused(true);

        let resumer = {
            let control = Arc::clone(&control);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                control.set_paused(false);
            })
        };
        let started = Instant::now();
        while control.wait_while_paused(Duration::from_secs(5)) {}
        resumer.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!control.is_paused());
    }

    #[test]
    fn test_cancel_ends_pause_wait() {
        let control = SessionControl::new();
        control.set_paused(true);
        control.cancel();
        assert!(!control.wait_while_paused(Duration::from_secs(5)));
        assert!(control.cancel_token().load(Ordering::Acquire));
    }

    #[test]
    fn test_first_failure_wins() {
        let control = SessionControl::new();
        control.fail("render failed");
        control.fail("second");
        assert_eq!(control.take_failure().as_deref(), Some("render failed"));
        assert_eq!(control.take_failure(), None);
    }
}
