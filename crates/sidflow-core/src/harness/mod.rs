//! External-process playback
//!
//! The [`PlaybackHarness`] streams a tune into a host audio player (`aplay`,
//! `ffplay`, `play`, or anything configured) through the player's stdin:
//!
//! ```text
//! render pump thread          sink writer thread
//! Engine ──► RingBuffer ──► PipeSink (child stdin) ──► host player
//! ```
//!
//! The pump renders `chunk_seconds` at a time and backs off while the ring is
//! full. The writer drains the ring into the pipe, waiting on the pipe when it
//! is full. Neither ever drops audio. When the tune ends (or the requested
//! duration is reached) the ring is closed, the writer closes the player's
//! stdin and reports how the player exited.

mod candidates;
mod control;
mod events;
mod pump;
mod writer;

pub use candidates::PlayerCandidate;
pub use control::SessionControl;
pub use events::{EventBus, EventKind, HarnessEvent, StartedEvent, SubscriptionId};

use self::pump::{PumpSettings, run_render_pump};
use self::writer::{WriterContext, run_sink_writer};
use crate::config::HarnessConfig;
use crate::engine::Engine;
use crate::ring_buffer::RingBuffer;
use crate::telemetry::Telemetry;
use crate::{Result, SidFlowError};
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use sidflow_common::{EmulatorBackend, PcmFormat};
use std::path::Path;
use std::process::Child;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Harness lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HarnessState {
    /// No session, or the last one has ended.
    #[default]
    Idle,
    /// Streaming to a host player.
    Playing,
    /// Logically paused; the host player is still alive.
    Paused,
}

/// Options for [`PlaybackHarness::start`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    /// 1-based song; the tune's default song when `None`.
    pub song: Option<u16>,
    /// Start position in seconds.
    pub offset_seconds: f64,
    /// Stop after this much audio; play to the end of the tune when `None`.
    pub duration_seconds: Option<f64>,
}

/// Returned by a successful [`PlaybackHarness::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct StartResult {
    /// Host process id.
    pub pid: u32,
    /// Command line of the spawned player.
    pub command: String,
    /// Position streaming started from.
    pub offset_seconds: f64,
}

struct ActiveSession {
    control: Arc<SessionControl>,
    ring: Arc<RingBuffer>,
    child: Arc<Mutex<Child>>,
    pid: u32,
    command: String,
    format: PcmFormat,
    offset_frames: u64,
    pump: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

/// Streams tunes into an external player process
pub struct PlaybackHarness<B: EmulatorBackend + 'static> {
    factory: Box<dyn Fn() -> B + Send + Sync>,
    config: HarnessConfig,
    events: EventBus,
    telemetry: Arc<Telemetry>,
    state: Arc<Mutex<HarnessState>>,
    session: Option<ActiveSession>,
}

impl<B: EmulatorBackend + 'static> PlaybackHarness<B> {
    /// Create a harness. `factory` builds a fresh backend for every session.
    pub fn new<F>(factory: F, config: HarnessConfig) -> Self
    where
        F: Fn() -> B + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            config,
            events: EventBus::new(),
            telemetry: Arc::new(Telemetry::new()),
            state: Arc::new(Mutex::new(HarnessState::Idle)),
            session: None,
        }
    }

    /// Start streaming `tune_path`, replacing any current session.
    ///
    /// # Errors
    ///
    /// - `Io` if the file cannot be read
    /// - `InvalidFormat` / `InvalidArgument` from loading, song selection or
    ///   seeking
    /// - `ConfigError` for an unusable configuration
    /// - `NoPlayerAvailable` if no candidate could be spawned
    pub fn start<P: AsRef<Path>>(&mut self, tune_path: P, options: StartOptions) -> Result<StartResult> {
        self.stop();
        self.config.validate()?;
        if let Some(duration) = options.duration_seconds {
            if !duration.is_finite() || duration <= 0.0 {
                return Err(SidFlowError::InvalidArgument(format!(
                    "duration must be a positive number of seconds, got {duration}"
                )));
            }
        }

        let path = tune_path.as_ref();
        let data = std::fs::read(path)?;
        self.telemetry.reset();
        let mut engine = Engine::new((self.factory)(), self.config.engine.clone())
            .with_telemetry(Arc::clone(&self.telemetry));
        let info = engine.load_tune(&data)?;
        if let Some(song) = options.song {
            engine.select_song(song)?;
        }
        engine.seek_seconds(options.offset_seconds)?;
        engine.play()?;

        let format = engine.format();
        let ring = Arc::new(RingBuffer::with_seconds(
            format,
            self.config.ring_buffer_seconds,
            Arc::clone(&self.telemetry),
        )?);
        let spawned = candidates::spawn_first(&self.config.candidates, format)?;

        let control = Arc::new(SessionControl::new());
        engine.set_cancel_token(control.cancel_token());

        let offset_frames = engine.current_frame();
        let offset_seconds = engine.position_seconds();
        let duration_seconds = options.duration_seconds.or(info.duration_seconds);
        let child = Arc::new(Mutex::new(spawned.child));
        let mut session = ActiveSession {
            control: Arc::clone(&control),
            ring: Arc::clone(&ring),
            child: Arc::clone(&child),
            pid: spawned.pid,
            command: spawned.command.clone(),
            format,
            offset_frames,
            pump: None,
            writer: None,
        };

        *self.state.lock() = HarnessState::Playing;
        info!(
            "streaming {} from {offset_seconds:.3}s via {} (pid {})",
            path.display(),
            session.command,
            session.pid
        );
        self.events.emit(&HarnessEvent::Started(StartedEvent {
            pid: session.pid,
            command: session.command.clone(),
            started_at: Utc::now(),
            offset_seconds,
            duration_seconds,
        }));

        let settings = PumpSettings {
            chunk_frames: format.frames_for_seconds(self.config.chunk_seconds),
            limit_frames: options
                .duration_seconds
                .map(|seconds| format.frames_for_seconds(seconds)),
            backoff: Duration::from_micros(self.config.backoff_micros),
        };
        let writer_ctx = WriterContext {
            ring: Arc::clone(&ring),
            control: Arc::clone(&control),
            telemetry: Arc::clone(&self.telemetry),
            child,
            events: self.events.clone(),
            state: Arc::clone(&self.state),
            command: spawned.command,
        };
        let stdin = spawned.stdin;

        let threads = std::thread::Builder::new()
            .name("sidflow-render".into())
            .spawn({
                let (ring, control) = (Arc::clone(&ring), Arc::clone(&control));
                move || run_render_pump(engine, ring, control, settings)
            })
            .and_then(|pump| {
                session.pump = Some(pump);
                std::thread::Builder::new()
                    .name("sidflow-sink".into())
                    .spawn(move || run_sink_writer(writer_ctx, stdin))
            });

        let result = StartResult {
            pid: session.pid,
            command: session.command.clone(),
            offset_seconds,
        };
        match threads {
            Ok(writer) => {
                session.writer = Some(writer);
                self.session = Some(session);
                Ok(result)
            }
            Err(e) => {
                self.session = Some(session);
                self.stop();
                Err(SidFlowError::Io(e))
            }
        }
    }

    /// Stop the current session. Safe to call in any state.
    ///
    /// Cancels rendering, kills and reaps the host player and joins the
    /// session threads. No `finished` or `error` event is emitted.
    pub fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            *self.state.lock() = HarnessState::Idle;
            return;
        };

        session.control.mark_stopped_by_caller();
        session.control.cancel();
        session.ring.close();
        session.ring.clear();
        {
            let mut child = session.child.lock();
            if let Err(e) = child.kill() {
                debug!("kill pid {}: {e}", session.pid);
            }
            if let Err(e) = child.wait() {
                warn!("reaping pid {} failed: {e}", session.pid);
            }
        }

        for handle in [session.pump.take(), session.writer.take()].into_iter().flatten() {
            if handle.join().is_err() {
                warn!("session thread panicked");
            }
        }
        *self.state.lock() = HarnessState::Idle;
        info!("stopped {} (pid {})", session.command, session.pid);
    }

    /// Pause streaming; the host player stays alive. Returns `false` if not
    /// playing.
    pub fn pause(&mut self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let mut state = self.state.lock();
        if *state != HarnessState::Playing {
            return false;
        }
        session.control.set_paused(true);
        session.ring.set_playing(false);
        *state = HarnessState::Paused;
        debug!("paused pid {}", session.pid);
        true
    }

    /// Resume a paused session from the same buffered position. Returns
    /// `false` if not paused.
    pub fn resume(&mut self) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let mut state = self.state.lock();
        if *state != HarnessState::Paused {
            return false;
        }
        session.ring.set_playing(true);
        session.control.set_paused(false);
        *state = HarnessState::Playing;
        debug!("resumed pid {}", session.pid);
        true
    }

    /// Subscribe to harness events.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> SubscriptionId
    where
        F: Fn(&HarnessEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, listener)
    }

    /// Remove a subscription.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.events.off(id)
    }

    /// Current state.
    pub fn state(&self) -> HarnessState {
        *self.state.lock()
    }

    /// Pid of the running host player, if a session is active.
    pub fn active_pid(&self) -> Option<u32> {
        match (&self.session, self.state()) {
            (Some(session), HarnessState::Playing | HarnessState::Paused) => Some(session.pid),
            _ => None,
        }
    }

    /// Position of the audio handed to the player, in seconds.
    pub fn position_seconds(&self) -> f64 {
        self.session.as_ref().map_or(0.0, |session| {
            let consumed = self.telemetry.snapshot().frames_consumed;
            session.format.seconds_for_frames(session.offset_frames + consumed)
        })
    }

    /// Telemetry of the current (or last) session.
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// Harness configuration.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }
}

impl<B: EmulatorBackend + 'static> Drop for PlaybackHarness<B> {
    fn drop(&mut self) {
        self.stop();
    }
}
