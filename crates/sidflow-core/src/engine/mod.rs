//! Cycle-batched render loop.
//!
//! The [`Engine`] owns one [`EmulatorBackend`] and turns requests for audio
//! ("give me 0.25 s", "advance 20 000 cycles") into backend calls of
//! `cycles_per_batch` cycles each. Between batches it:
//!
//! - checks the cancellation token, returning whatever was produced so far
//! - calls the yield hook every `yield_every_batches` batches so a
//!   single-threaded host stays responsive during long renders
//! - offers each batch to the [`RenderCache`] and, when the backend supports
//!   it, records a state checkpoint every `checkpoint_interval_seconds`
//!
//! # Positions
//!
//! Two frame positions are tracked. `current_frame` is what the caller sees:
//! the next frame a render will return. The emulator position is where the
//! backend actually is. They diverge after a seek, while a cached run is being
//! served, and because a batch rarely ends exactly where a request does. The
//! frames a batch produced past the end of a request stay pending and are
//! handed out first by the next request, so consecutive renders are gapless
//! and `render_seconds` returns exactly `round(seconds * rate)` frames.
//!
//! When the caller needs a frame that is neither pending nor cached, the
//! emulator is moved there: forward by rendering (output is cached, not
//! returned), backward by restoring the nearest checkpoint at or before the
//! target or, failing that, reselecting the song and replaying from frame 0.

mod checkpoints;

use self::checkpoints::Checkpoints;
use crate::cache::{CacheScope, RenderCache};
use crate::config::EngineConfig;
use crate::telemetry::Telemetry;
use crate::{Result, SidFlowError};
use log::{debug, info, trace};
use sidflow_common::{EmulatorBackend, PcmChunk, PcmFormat, PlaybackState, Rendered, TuneInfo};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// How a render request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// All requested frames were produced.
    Completed,
    /// The tune ended; the chunk holds everything up to the end.
    EndOfStream,
    /// The cancellation token was set; the chunk holds the frames produced
    /// before the batch boundary where it was observed.
    Cancelled,
}

/// PCM produced by one request together with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    /// Frames starting at the position the request began at.
    pub chunk: PcmChunk,
    /// Why the request stopped.
    pub outcome: RenderOutcome,
}

enum Step {
    Frames(PcmChunk),
    Ended,
    Cancelled,
}

enum Positioned {
    Ready,
    Ended,
    Cancelled,
}

type YieldHook = Box<dyn FnMut() + Send>;

/// Render loop over an emulator backend
pub struct Engine<B: EmulatorBackend> {
    backend: B,
    config: EngineConfig,
    telemetry: Arc<Telemetry>,
    cache: RenderCache,
    checkpoints: Checkpoints<B::Snapshot>,
    yield_hook: YieldHook,
    cancel: Option<Arc<AtomicBool>>,
    batches_since_yield: u32,

    loaded: bool,
    tune_id: u64,
    song: u16,
    format: PcmFormat,
    state: PlaybackState,

    current_frame: u64,
    emulated_frame: u64,
    /// Last batch, covering `[emulated_frame - len, emulated_frame)`
    pending: Option<PcmChunk>,
    backend_ended: bool,
    end_frame: Option<u64>,
}

impl<B: EmulatorBackend> Engine<B> {
    /// Create an engine around `backend`. No tune is loaded yet.
    pub fn new(backend: B, config: EngineConfig) -> Self {
        let format = backend.format();
        let interval = format.frames_for_seconds(config.checkpoint_interval_seconds);
        Self {
            cache: RenderCache::from_config(&config.cache, format),
            checkpoints: Checkpoints::new(interval),
            backend,
            config,
            telemetry: Arc::new(Telemetry::new()),
            yield_hook: Box::new(std::thread::yield_now),
            cancel: None,
            batches_since_yield: 0,
            loaded: false,
            tune_id: 0,
            song: 1,
            format,
            state: PlaybackState::Stopped,
            current_frame: 0,
            emulated_frame: 0,
            pending: None,
            backend_ended: false,
            end_frame: None,
        }
    }

    /// Report into a shared telemetry recorder instead of a private one.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Replace the cooperative yield hook (default: `std::thread::yield_now`).
    pub fn set_yield_hook<F>(&mut self, hook: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.yield_hook = Box::new(hook);
    }

    /// Install a token checked at every batch boundary.
    pub fn set_cancel_token(&mut self, token: Arc<AtomicBool>) {
        self.cancel = Some(token);
    }

    /// Load a tune and position at frame 0 of its default song.
    pub fn load_tune(&mut self, data: &[u8]) -> Result<TuneInfo> {
        self.loaded = false;
        let info = self.backend.load_tune(data)?;

        let format = self.backend.format();
        if !format.is_valid() {
            return Err(SidFlowError::InvalidFormat(format!(
                "backend reported unsupported format: {} Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }
        if format != self.format {
            self.cache.reconfigure(&self.config.cache, format);
            self.checkpoints
                .set_interval(format.frames_for_seconds(self.config.checkpoint_interval_seconds));
            self.format = format;
        }

        self.tune_id = tune_id(data);
        self.song = info.start_song.max(1);
        self.loaded = true;
        self.state = PlaybackState::Stopped;
        self.reset_position();
        self.cache.set_scope(self.scope());

        info!(
            "loaded \"{}\" by {} ({} song(s), {} Hz, {} ch)",
            info.title, info.author, info.song_count, format.sample_rate, format.channels
        );
        Ok(info)
    }

    /// Select a subtune by 1-based index and rewind to its start.
    pub fn select_song(&mut self, index: u16) -> Result<()> {
        self.ensure_loaded()?;
        let count = self.backend.tune_info().map_or(0, |info| info.song_count);
        if index == 0 || index > count {
            return Err(SidFlowError::InvalidArgument(format!(
                "song {index} out of range 1..={count}"
            )));
        }
        self.backend.select_song(index)?;
        self.song = index;
        self.reset_position();
        self.cache.set_scope(self.scope());
        debug!("selected song {index}/{count}");
        Ok(())
    }

    /// Seek to a position in seconds.
    pub fn seek_seconds(&mut self, seconds: f64) -> Result<()> {
        self.ensure_loaded()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(SidFlowError::InvalidArgument(format!(
                "seek position must be a non-negative number of seconds, got {seconds}"
            )));
        }
        self.seek_frame(self.format.frames_for_seconds(seconds))
    }

    /// Seek to an absolute frame.
    ///
    /// If the frame is neither cached nor where the emulator already is, the
    /// emulator is moved there now so the next render starts immediately.
    /// Seeking past a known end of tune lands on the end.
    pub fn seek_frame(&mut self, frame: u64) -> Result<()> {
        self.ensure_loaded()?;
        let target = self.end_frame.map_or(frame, |end| frame.min(end));
        self.current_frame = target;
        debug!(
            "seek to frame {target} ({:.3}s)",
            self.format.seconds_for_frames(target)
        );

        if self.pending_covers(target)
            || self.emulated_frame == target
            || self.cache.contains(target)
        {
            return Ok(());
        }
        let cycles = self.batch_cycles(None)?;
        if let Positioned::Ended = self.position_emulator(target, cycles)? {
            if let Some(end) = self.end_frame {
                self.current_frame = self.current_frame.min(end);
            }
        }
        Ok(())
    }

    /// Render `seconds` of audio from the current position.
    ///
    /// Returns exactly `round(seconds * sample_rate)` frames unless the tune
    /// ends (fewer, possibly none) or the render is cancelled.
    pub fn render_seconds(&mut self, seconds: f64, cycles_per_batch: Option<u32>) -> Result<PcmChunk> {
        self.render_seconds_report(seconds, cycles_per_batch)
            .map(|report| report.chunk)
    }

    /// Like [`render_seconds`](Self::render_seconds), also reporting why it stopped.
    pub fn render_seconds_report(
        &mut self,
        seconds: f64,
        cycles_per_batch: Option<u32>,
    ) -> Result<RenderReport> {
        self.ensure_loaded()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(SidFlowError::InvalidArgument(format!(
                "render duration must be a non-negative number of seconds, got {seconds}"
            )));
        }
        let cycles = self.batch_cycles(cycles_per_batch)?;
        let frames = self.format.frames_for_seconds(seconds);
        self.render_frames(frames, cycles)
    }

    /// Advance emulation by `cycles` and return the PCM produced.
    ///
    /// Frames already rendered past the current position (left over from a
    /// previous batch) come first. Returns `None` once the tune has ended.
    pub fn render_cycles(&mut self, cycles: u32) -> Result<Option<PcmChunk>> {
        self.ensure_loaded()?;
        let cycles = self.batch_cycles(Some(cycles))?;
        let at = self.current_frame;
        if self.end_frame.is_some_and(|end| at >= end) {
            return Ok(None);
        }

        match self.position_emulator(at, cycles)? {
            Positioned::Ready => {}
            Positioned::Ended => return Ok(None),
            Positioned::Cancelled => return Ok(Some(PcmChunk::empty(at, self.format.channels))),
        }

        let mut parts = Vec::with_capacity(2);
        if let Some(head) = self.pending_slice(at, u64::MAX) {
            parts.push(head);
        }
        if !self.backend_ended {
            let before = self.emulated_frame;
            self.render_batch(cycles)?;
            if self.emulated_frame > before {
                parts.extend(self.pending.clone());
            }
        }
        if parts.is_empty() && self.backend_ended {
            return Ok(None);
        }

        let chunk = PcmChunk::concat(at, self.format.channels, &parts);
        self.current_frame = chunk.end_frame();
        self.telemetry.record_frames_produced(chunk.frame_count());
        Ok(Some(chunk))
    }

    /// Mark the session as playing.
    pub fn play(&mut self) -> Result<()> {
        self.ensure_loaded()?;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Pause a playing session.
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Stop and rewind to the start of the current song.
    pub fn stop(&mut self) -> Result<()> {
        self.state = PlaybackState::Stopped;
        if self.loaded {
            self.seek_frame(0)?;
        }
        Ok(())
    }

    /// Discard the session. Renders fail with `NotLoaded` until the next load.
    pub fn unload(&mut self) {
        self.loaded = false;
        self.state = PlaybackState::Stopped;
        self.reset_position();
        self.cache.clear();
    }

    /// Whether a tune is loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Metadata of the loaded tune.
    pub fn tune_info(&self) -> Option<&TuneInfo> {
        if self.loaded {
            self.backend.tune_info()
        } else {
            None
        }
    }

    /// Session sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    /// Session channel count.
    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    /// Session PCM format.
    pub fn format(&self) -> PcmFormat {
        self.format
    }

    /// Selected song (1-based).
    pub fn song(&self) -> u16 {
        self.song
    }

    /// Next frame a render will return.
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    /// [`current_frame`](Self::current_frame) in seconds.
    pub fn position_seconds(&self) -> f64 {
        self.format.seconds_for_frames(self.current_frame)
    }

    /// End of the current song, once the backend has reported it.
    pub fn end_frame(&self) -> Option<u64> {
        self.end_frame
    }

    /// Playback state.
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// The render cache.
    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// Number of recorded emulator checkpoints.
    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    /// Telemetry this engine reports into.
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn render_frames(&mut self, frames: u64, cycles: u32) -> Result<RenderReport> {
        let start = self.current_frame;
        let mut parts = Vec::new();
        let mut remaining = frames;

        let outcome = loop {
            if remaining == 0 {
                break RenderOutcome::Completed;
            }
            if self.is_cancelled() {
                break RenderOutcome::Cancelled;
            }
            match self.next_step(remaining, cycles)? {
                Step::Frames(chunk) => {
                    remaining -= chunk.frame_count();
                    self.current_frame = chunk.end_frame();
                    if !chunk.is_empty() {
                        parts.push(chunk);
                    }
                }
                Step::Ended => break RenderOutcome::EndOfStream,
                Step::Cancelled => break RenderOutcome::Cancelled,
            }
        };

        let chunk = PcmChunk::concat(start, self.format.channels, &parts);
        self.telemetry.record_frames_produced(chunk.frame_count());
        if outcome == RenderOutcome::Cancelled {
            debug!("render cancelled at frame {}", self.current_frame);
        }
        Ok(RenderReport { chunk, outcome })
    }

    /// Next run of at most `max` frames at `current_frame`.
    fn next_step(&mut self, max: u64, cycles: u32) -> Result<Step> {
        let at = self.current_frame;
        if self.end_frame.is_some_and(|end| at >= end) {
            return Ok(Step::Ended);
        }
        if let Some(chunk) = self.pending_slice(at, max) {
            return Ok(Step::Frames(chunk));
        }

        if self.emulated_frame != at {
            if let Some(run) = self.cache.cached_run(at, max) {
                trace!("serving frames {at}..{} from cache", run.end_frame());
                return Ok(Step::Frames(run));
            }
            match self.position_emulator(at, cycles)? {
                Positioned::Ready => {}
                Positioned::Ended => return Ok(Step::Ended),
                Positioned::Cancelled => return Ok(Step::Cancelled),
            }
            if let Some(chunk) = self.pending_slice(at, max) {
                return Ok(Step::Frames(chunk));
            }
        }

        if self.backend_ended {
            return Ok(Step::Ended);
        }
        self.render_batch(cycles)?;
        Ok(match self.pending_slice(at, max) {
            Some(chunk) => Step::Frames(chunk),
            None if self.backend_ended => Step::Ended,
            None => Step::Frames(PcmChunk::empty(at, self.format.channels)),
        })
    }

    /// Move the emulator so that `target` is either pending or next to render.
    fn position_emulator(&mut self, target: u64, cycles: u32) -> Result<Positioned> {
        if self.pending_covers(target) || self.emulated_frame == target {
            return Ok(Positioned::Ready);
        }
        if self.emulated_frame > target {
            self.rewind(target)?;
        }

        let from = self.emulated_frame;
        while !(self.pending_covers(target) || self.emulated_frame == target) {
            if self.backend_ended {
                return Ok(Positioned::Ended);
            }
            if self.is_cancelled() {
                return Ok(Positioned::Cancelled);
            }
            self.render_batch(cycles)?;
        }
        trace!("fast-forwarded emulator from frame {from} to {target}");
        Ok(Positioned::Ready)
    }

    fn rewind(&mut self, target: u64) -> Result<()> {
        let nearest = self
            .checkpoints
            .nearest(target)
            .map(|(frame, state)| (frame, state.clone()));
        if let Some((frame, state)) = nearest {
            if self.backend.restore(&state) {
                trace!("restored checkpoint at frame {frame} (target {target})");
                self.jump_to(frame);
                return Ok(());
            }
        }

        self.backend.select_song(self.song)?;
        trace!("replaying song {} from frame 0 (target {target})", self.song);
        self.jump_to(0);
        Ok(())
    }

    fn render_batch(&mut self, cycles: u32) -> Result<()> {
        let rendered = self.backend.render_cycles(cycles)?;

        self.batches_since_yield += 1;
        if self.batches_since_yield >= self.config.yield_every_batches.max(1) {
            self.batches_since_yield = 0;
            (self.yield_hook)();
        }

        match rendered {
            Rendered::EndOfStream => {
                if !self.backend_ended {
                    debug!(
                        "end of tune at frame {} ({:.3}s)",
                        self.emulated_frame,
                        self.format.seconds_for_frames(self.emulated_frame)
                    );
                }
                self.backend_ended = true;
                self.end_frame = Some(self.emulated_frame);
            }
            Rendered::Samples(samples) => {
                let chunk = PcmChunk::new(self.emulated_frame, self.format.channels, samples);
                self.emulated_frame = chunk.end_frame();
                if !chunk.is_empty() {
                    self.cache.put(chunk.clone());
                    self.pending = Some(chunk);
                }
                if self.checkpoints.is_due(self.emulated_frame) {
                    match self.backend.snapshot() {
                        Some(state) => self.checkpoints.record(self.emulated_frame, state),
                        None => self.checkpoints.resume_from(self.emulated_frame),
                    }
                }
            }
        }
        Ok(())
    }

    fn pending_covers(&self, frame: u64) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|chunk| chunk.contains_frame(frame))
    }

    fn pending_slice(&self, frame: u64, max: u64) -> Option<PcmChunk> {
        let chunk = self.pending.as_ref()?;
        chunk
            .contains_frame(frame)
            .then(|| chunk.slice_frames(frame - chunk.start_frame(), max))
    }

    fn jump_to(&mut self, frame: u64) {
        self.emulated_frame = frame;
        self.pending = None;
        self.backend_ended = false;
        self.checkpoints.resume_from(frame);
    }

    fn reset_position(&mut self) {
        self.current_frame = 0;
        self.emulated_frame = 0;
        self.pending = None;
        self.backend_ended = false;
        self.end_frame = None;
        self.batches_since_yield = 0;
        self.checkpoints.clear();
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|token| token.load(Ordering::Acquire))
    }

    fn batch_cycles(&self, requested: Option<u32>) -> Result<u32> {
        match requested.unwrap_or(self.config.cycles_per_batch) {
            0 => Err(SidFlowError::InvalidArgument(
                "cycles per batch must be greater than 0".into(),
            )),
            cycles => Ok(cycles),
        }
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(SidFlowError::NotLoaded)
        }
    }

    fn scope(&self) -> CacheScope {
        CacheScope {
            tune_id: self.tune_id,
            song: self.song,
        }
    }
}

fn tune_id(data: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    hasher.finish()
}
