//! Sink writer: ring buffer → host player stdin, then exit reporting.

use super::events::{EventBus, HarnessEvent};
use super::{HarnessState, SessionControl};
use crate::ring_buffer::RingBuffer;
use crate::sink::{PipeSink, PlaybackSink, PumpExit, pump_ring_to_sink_until};
use crate::telemetry::Telemetry;
use crate::SidFlowError;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::io;
use std::process::{Child, ChildStdin, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

const EXIT_POLL: Duration = Duration::from_millis(10);

/// How long a player that stopped reading gets to exit on its own.
const BROKEN_PIPE_GRACE: Duration = Duration::from_secs(2);

pub(crate) struct WriterContext {
    pub ring: Arc<RingBuffer>,
    pub control: Arc<SessionControl>,
    pub telemetry: Arc<Telemetry>,
    pub child: Arc<Mutex<Child>>,
    pub events: EventBus,
    pub state: Arc<Mutex<HarnessState>>,
    pub command: String,
}

pub(crate) fn run_sink_writer(ctx: WriterContext, stdin: ChildStdin) {
    let mut sink = PipeSink::new(stdin);
    // Set when the player is seen to exit while the session is paused
    let mut exited = None;
    let result = pump_ring_to_sink_until(&ctx.ring, &mut sink, &ctx.telemetry, &ctx.control, || {
        match ctx.child.lock().try_wait() {
            Ok(Some(status)) => {
                exited = Some(status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("polling paused player failed: {e}");
                false
            }
        }
    });

    // EOF for the player; also unblocks a producer still waiting for space
    if let Err(e) = sink.close() {
        debug!("closing player stdin: {e}");
    }
    if !matches!(result, Ok(PumpExit::Drained)) {
        ctx.control.cancel();
        ctx.ring.close();
    }
    if ctx.control.stopped_by_caller() {
        return;
    }

    if let Some(failure) = ctx.control.take_failure() {
        kill(&ctx.child);
        report(&ctx, HarnessEvent::Error { message: failure });
        return;
    }

    let status = match result {
        Ok(PumpExit::Drained) => wait_for_exit(&ctx.child, &ctx.control, None),
        Ok(PumpExit::Cancelled) => return,
        Ok(PumpExit::SinkGone) => {
            info!("{} exited while paused", ctx.command);
            exited
        }
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            warn!("{} stopped reading audio", ctx.command);
            let status = wait_for_exit(&ctx.child, &ctx.control, Some(BROKEN_PIPE_GRACE));
            if status.is_none() {
                kill(&ctx.child);
            }
            status
        }
        Err(e) => {
            kill(&ctx.child);
            report(
                &ctx,
                HarnessEvent::Error {
                    message: format!("writing to {} failed: {e}", ctx.command),
                },
            );
            return;
        }
    };

    if ctx.control.stopped_by_caller() {
        return;
    }
    let event = match status {
        Some(status) if status.success() => {
            info!("{} finished", ctx.command);
            HarnessEvent::Finished
        }
        Some(status) => {
            let err = SidFlowError::HostProcessExit {
                code: status.code(),
            };
            warn!("{}: {err}", ctx.command);
            HarnessEvent::Error {
                message: err.to_string(),
            }
        }
        None => HarnessEvent::Error {
            message: format!("{} stopped reading audio and did not exit", ctx.command),
        },
    };
    report(&ctx, event);
}

/// Poll the child until it exits, the caller stops the session, or `limit`
/// elapses.
fn wait_for_exit(
    child: &Mutex<Child>,
    control: &SessionControl,
    limit: Option<Duration>,
) -> Option<ExitStatus> {
    let started = Instant::now();
    loop {
        match child.lock().try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => {
                warn!("waiting for player failed: {e}");
                return None;
            }
        }
        if control.stopped_by_caller() || limit.is_some_and(|limit| started.elapsed() >= limit) {
            return None;
        }
        std::thread::sleep(EXIT_POLL);
    }
}

fn kill(child: &Mutex<Child>) {
    let mut child = child.lock();
    if let Err(e) = child.kill() {
        debug!("kill pid {}: {e}", child.id());
    }
    if let Err(e) = child.wait() {
        warn!("reaping pid {} failed: {e}", child.id());
    }
}

fn report(ctx: &WriterContext, event: HarnessEvent) {
    *ctx.state.lock() = HarnessState::Idle;
    ctx.events.emit(&event);
}
