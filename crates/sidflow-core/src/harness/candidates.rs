//! Host player commands and the spawn-with-fallback logic.

use crate::{Result, SidFlowError};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sidflow_common::PcmFormat;
use std::process::{Child, ChildStdin, Command, Stdio};

/// An external program that plays raw s16le PCM from stdin.
///
/// `{rate}` and `{channels}` in `args` are replaced with the session format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCandidate {
    /// Executable name or path.
    pub program: String,
    /// Arguments, with placeholders.
    #[serde(default)]
    pub args: Vec<String>,
}

impl PlayerCandidate {
    /// Build a candidate from a program and its arguments.
    pub fn new<S: Into<String>>(program: impl Into<String>, args: impl IntoIterator<Item = S>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// ALSA `aplay`.
    pub fn aplay() -> Self {
        Self::new(
            "aplay",
            ["-q", "-t", "raw", "-f", "S16_LE", "-r", "{rate}", "-c", "{channels}", "-"],
        )
    }

    /// FFmpeg's `ffplay`.
    pub fn ffplay() -> Self {
        Self::new(
            "ffplay",
            [
                "-nodisp", "-autoexit", "-loglevel", "error", "-f", "s16le", "-ar", "{rate}",
                "-ac", "{channels}", "-i", "-",
            ],
        )
    }

    /// SoX `play`.
    pub fn sox_play() -> Self {
        Self::new(
            "play",
            [
                "-q", "-t", "raw", "-r", "{rate}", "-e", "signed-integer", "-b", "16", "-c",
                "{channels}", "-",
            ],
        )
    }

    /// Default fallback order.
    pub fn defaults() -> Vec<Self> {
        vec![Self::aplay(), Self::ffplay(), Self::sox_play()]
    }

    /// Arguments with placeholders filled in.
    pub fn resolved_args(&self, format: PcmFormat) -> Vec<String> {
        let rate = format.sample_rate.to_string();
        let channels = format.channels.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{rate}", &rate).replace("{channels}", &channels))
            .collect()
    }

    /// Printable command line for logs, events and errors.
    pub fn command_line(&self, format: PcmFormat) -> String {
        std::iter::once(self.program.clone())
            .chain(self.resolved_args(format))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A successfully spawned host player.
#[derive(Debug)]
pub(crate) struct SpawnedPlayer {
    pub child: Child,
    pub stdin: ChildStdin,
    pub pid: u32,
    pub command: String,
}

/// Spawn the first candidate that starts and exposes a writable stdin.
pub(crate) fn spawn_first(candidates: &[PlayerCandidate], format: PcmFormat) -> Result<SpawnedPlayer> {
    let mut attempts = Vec::new();
    if candidates.is_empty() {
        attempts.push("no player candidates configured".to_string());
    }

    for candidate in candidates {
        let command = candidate.command_line(format);
        debug!("trying player: {command}");
        let spawned = Command::new(&candidate.program)
            .args(candidate.resolved_args(format))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => match child.stdin.take() {
                Some(stdin) => {
                    let pid = child.id();
                    info!("spawned player (pid {pid}): {command}");
                    return Ok(SpawnedPlayer {
                        child,
                        stdin,
                        pid,
                        command,
                    });
                }
                None => {
                    if let Err(e) = child.kill() {
                        debug!("kill pid {}: {e}", child.id());
                    }
                    if let Err(e) = child.wait() {
                        warn!("reaping pid {} failed: {e}", child.id());
                    }
                    warn!("player {command} has no writable stdin");
                    attempts.push(format!("{command}: stdin not writable"));
                }
            },
            Err(e) => {
                warn!("player {command} failed to start: {e}");
                attempts.push(format!("{command}: {e}"));
            }
        }
    }

    Err(SidFlowError::NoPlayerAvailable { attempts })
}
