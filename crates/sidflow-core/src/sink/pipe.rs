use super::{PlaybackSink, SinkWrite};
use std::io::{self, Write};
use std::process::ChildStdin;

/// Standard input of a host player process.
///
/// The pipe is opened in blocking mode, so backpressure comes from the kernel:
/// `write` sleeps while the pipe buffer is full and returns once the player
/// has read enough to take at least part of the data. A partial write
/// therefore already means the player made room, and the remainder is simply
/// written again.
#[derive(Debug)]
pub struct PipeSink {
    stdin: Option<ChildStdin>,
}

impl PipeSink {
    /// Wrap a child's piped stdin.
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin: Some(stdin) }
    }

    fn stdin(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "player stdin closed"))
    }
}

impl PlaybackSink for PipeSink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<SinkWrite> {
        if bytes.is_empty() {
            return Ok(SinkWrite::Accepted);
        }
        let written = loop {
            match self.stdin()?.write(bytes) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "player stdin accepted no data",
                    ));
                }
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };
        if written == bytes.len() {
            Ok(SinkWrite::Accepted)
        } else {
            Ok(SinkWrite::Partial(written))
        }
    }

    /// Nothing to wait for beyond the next blocking `write`; `ChildStdin` is
    /// unbuffered, so this only checks that the pipe is still open.
    fn wait_drained(&mut self) -> io::Result<()> {
        self.stdin()?.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        // Dropping the handle closes our end of the pipe
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush()?;
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::sink::write_with_backpressure;
    use crate::telemetry::Telemetry;
    use std::io::Read;
    use std::process::{Command, Stdio};
    use std::time::{Duration, Instant};

    #[test]
    fn test_full_pipe_blocks_until_player_reads() {
        // Reads nothing for 0.3 s, then echoes everything back
        let mut child = Command::new("sh")
            .args(["-c", "sleep 0.3; exec cat"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let mut stdout = child.stdout.take().unwrap();
        let reader = std::thread::spawn(move || {
            let mut out = Vec::new();
            stdout.read_to_end(&mut out).unwrap();
            out
        });

        // Larger than any default pipe buffer
        let payload: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
        let mut sink = PipeSink::new(child.stdin.take().unwrap());
        let telemetry = Telemetry::new();
        let started = Instant::now();
        write_with_backpressure(&mut sink, &payload, &telemetry).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        sink.close().unwrap();

        assert_eq!(reader.join().unwrap(), payload);
        assert!(child.wait().unwrap().success());
        assert!(sink.write(&[0]).is_err());
    }
}
