//! Lifecycle events emitted by the playback harness.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Event categories listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A host player was spawned and streaming began.
    Started,
    /// The host player exited cleanly after the stream ended.
    Finished,
    /// The session failed.
    Error,
}

/// Payload of [`HarnessEvent::Started`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedEvent {
    /// Host process id.
    pub pid: u32,
    /// Command line of the spawned player.
    pub command: String,
    /// Wall-clock start time.
    pub started_at: DateTime<Utc>,
    /// Position streaming started from.
    pub offset_seconds: f64,
    /// Requested or known playback length.
    pub duration_seconds: Option<f64>,
}

/// A harness lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarnessEvent {
    /// Streaming started.
    Started(StartedEvent),
    /// Host exited with status 0 after the stream ended.
    Finished,
    /// Host exited unsuccessfully, or rendering/streaming failed.
    Error {
        /// Human-readable cause.
        message: String,
    },
}

impl HarnessEvent {
    /// Category of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            HarnessEvent::Started(_) => EventKind::Started,
            HarnessEvent::Finished => EventKind::Finished,
            HarnessEvent::Error { .. } => EventKind::Error,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&HarnessEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, EventKind, Listener)>,
}

/// Subscriber registry shared by the harness and its threads.
///
/// Listeners run on whichever thread emits: the caller's for `started`, the
/// sink writer's for `finished` and `error`. Emission iterates a snapshot of
/// the subscriber list, so listeners may subscribe or unsubscribe freely.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `listener` to events of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&HarnessEvent) + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.lock();
        subs.next_id += 1;
        let id = SubscriptionId(subs.next_id);
        subs.entries.push((id, kind, Arc::new(listener)));
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock();
        let before = subs.entries.len();
        subs.entries.retain(|(entry, _, _)| *entry != id);
        subs.entries.len() != before
    }

    /// Deliver `event` to every listener of its kind.
    pub fn emit(&self, event: &HarnessEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .subscribers
            .lock()
            .entries
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
