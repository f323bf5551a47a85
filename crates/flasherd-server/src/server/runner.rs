//! Child process execution.
//!
//! [`spawn`] starts the resolved command with stdin closed and both output
//! pipes captured. One producer task per pipe reads the output a line at a
//! time and pushes it onto a bounded channel, so the caller sees output as
//! the child flushes it rather than when it exits. The exit status is
//! obtained separately once both pipes are drained. In merged mode there is
//! a single pipe and a single producer.

use crate::server::{config::OutputMode, resolver::ResolvedCommand};
use bytes::Bytes;
use flasherd_core::{Error, Result};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Pipe a chunk of output was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputChannel {
    Stdout,
    Stderr,
}

/// One line (or the unterminated tail) of child output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub channel: OutputChannel,
    pub data: Bytes,
}

/// A spawned child and the receiving end of its output.
///
/// Dropping a `RunningProcess` kills the child.
pub struct RunningProcess {
    child: Child,
    output: mpsc::Receiver<Result<OutputChunk>>,
}

/// Spawns `command`. `buffer` bounds the number of output chunks queued
/// ahead of the consumer.
///
/// With [`OutputMode::Merged`] the child's stdout and stderr share one pipe,
/// so output is produced in exactly the order the child wrote it and every
/// chunk is tagged [`OutputChannel::Stdout`].
///
/// # Errors
///
/// Returns [`Error::Spawn`] if the executable cannot be launched.
pub fn spawn(command: &ResolvedCommand, mode: OutputMode, buffer: usize) -> Result<RunningProcess> {
    tracing::info!(
        "Spawning {:?} with args {:?} ({mode:?} output)",
        command.program(),
        command.args()
    );

    let mut cmd = Command::new(command.program());
    cmd.args(command.args())
        .stdin(Stdio::null())
        .kill_on_drop(true);

    let merged = match mode {
        OutputMode::Separate => {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            None
        }
        OutputMode::Merged => {
            let (reader, writer) = os_pipe::pipe().map_err(|source| Error::ProcessIo {
                context: "Failed to create output pipe",
                source,
            })?;
            let stderr_writer = writer.try_clone().map_err(|source| Error::ProcessIo {
                context: "Failed to create output pipe",
                source,
            })?;
            cmd.stdout(writer).stderr(stderr_writer);
            Some(reader)
        }
    };

    let spawned = cmd.spawn();
    // The write ends must be closed in this process or the reader never
    // sees end of file.
    drop(cmd);
    let mut child = spawned.map_err(|source| Error::Spawn {
        program: command.program().to_string_lossy().into_owned(),
        source,
    })?;

    let (tx, rx) = mpsc::channel(buffer.max(1));
    match merged {
        Some(reader) => read_merged(reader, tx)?,
        None => {
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(read_lines(stdout, OutputChannel::Stdout, tx.clone()));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(read_lines(stderr, OutputChannel::Stderr, tx));
            }
        }
    }

    Ok(RunningProcess { child, output: rx })
}

#[cfg(unix)]
fn read_merged(reader: os_pipe::PipeReader, tx: mpsc::Sender<Result<OutputChunk>>) -> Result<()> {
    use std::os::fd::OwnedFd;

    let pipe = tokio::net::unix::pipe::Receiver::from_owned_fd(OwnedFd::from(reader)).map_err(
        |source| Error::ProcessIo {
            context: "Failed to register output pipe",
            source,
        },
    )?;
    tokio::spawn(read_lines(pipe, OutputChannel::Stdout, tx));
    Ok(())
}

#[cfg(not(unix))]
fn read_merged(reader: os_pipe::PipeReader, tx: mpsc::Sender<Result<OutputChunk>>) -> Result<()> {
    use std::io::BufRead;

    tokio::task::spawn_blocking(move || {
        let mut reader = std::io::BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => return,
                Ok(_) => {
                    let chunk = OutputChunk {
                        channel: OutputChannel::Stdout,
                        data: Bytes::from(std::mem::take(&mut line)),
                    };
                    if tx.blocking_send(Ok(chunk)).is_err() {
                        return;
                    }
                }
                Err(source) => {
                    let _ = tx.blocking_send(Err(Error::ProcessIo {
                        context: "Failed to stream stdout",
                        source,
                    }));
                    return;
                }
            }
        }
    });
    Ok(())
}

impl RunningProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next chunk of output, in the order the producers read it. Returns
    /// `None` once both pipes are closed.
    ///
    /// Cancel safe.
    pub async fn next_output(&mut self) -> Option<Result<OutputChunk>> {
        self.output.recv().await
    }

    /// Waits for the child to exit and returns its exit code.
    ///
    /// Cancel safe.
    pub async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await.map_err(|source| Error::ProcessIo {
            context: "Failed to get exit code",
            source,
        })?;
        tracing::info!("Got status code: {status}");
        Ok(exit_code(status))
    }

    /// Kills the child and reaps it. Errors are logged, not returned: the
    /// child may already have exited.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!("Failed to kill child {:?}: {e}", self.child.id());
        }
    }
}

/// The child's exit code. On Unix a child killed by a signal reports
/// `128 + signal`, as shells do.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

async fn read_lines<R>(pipe: R, channel: OutputChannel, tx: mpsc::Sender<Result<OutputChunk>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => return,
            Ok(_) => {
                let chunk = OutputChunk {
                    channel,
                    data: Bytes::from(std::mem::take(&mut line)),
                };
                if tx.send(Ok(chunk)).await.is_err() {
                    // Consumer is gone; the child is being torn down.
                    return;
                }
            }
            Err(source) => {
                let context = match channel {
                    OutputChannel::Stdout => "Failed to stream stdout",
                    OutputChannel::Stderr => "Failed to stream stderr",
                };
                let _ = tx.send(Err(Error::ProcessIo { context, source })).await;
                return;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::server::resolver::resolve;
    use flasherd_core::{frame::CommandFrame, types::Platform};
    use std::path::Path;

    fn sh(script: &str) -> ResolvedCommand {
        let frame = CommandFrame::everywhere("sh").literal("-c").literal(script);
        resolve(&frame, Platform::Linux, Path::new("/tmp"), 67).unwrap()
    }

    fn spawn_separate(command: &ResolvedCommand, buffer: usize) -> Result<RunningProcess> {
        spawn(command, OutputMode::Separate, buffer)
    }

    async fn drain(process: &mut RunningProcess) -> Vec<OutputChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = process.next_output().await {
            chunks.push(chunk.unwrap());
        }
        chunks
    }

    #[tokio::test]
    async fn output_arrives_line_by_line_then_exit_code() {
        let mut process = spawn_separate(&sh("printf 'one\\ntwo\\nthree'; exit 3"), 16).unwrap();
        let chunks = drain(&mut process).await;
        let lines: Vec<_> = chunks.iter().map(|c| c.data.as_ref()).collect();
        assert_eq!(lines, [&b"one\n"[..], &b"two\n"[..], &b"three"[..]]);
        assert!(chunks.iter().all(|c| c.channel == OutputChannel::Stdout));
        assert_eq!(process.wait().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn stderr_is_tagged() {
        let mut process = spawn_separate(&sh("echo oops >&2"), 16).unwrap();
        let chunks = drain(&mut process).await;
        assert_eq!(
            chunks,
            [OutputChunk {
                channel: OutputChannel::Stderr,
                data: Bytes::from_static(b"oops\n"),
            }]
        );
        assert_eq!(process.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn output_is_delivered_before_exit() {
        let mut process = spawn_separate(&sh("echo ready; sleep 5"), 16).unwrap();
        let first = tokio::time::timeout(std::time::Duration::from_secs(3), process.next_output())
            .await
            .expect("line should arrive while the child is still running")
            .unwrap()
            .unwrap();
        assert_eq!(first.data, Bytes::from_static(b"ready\n"));
        process.kill().await;
    }

    #[tokio::test]
    async fn stdin_is_closed() {
        let mut process = spawn_separate(&sh("cat; echo done"), 16).unwrap();
        let chunks = drain(&mut process).await;
        assert_eq!(chunks.last().unwrap().data, Bytes::from_static(b"done\n"));
        assert_eq!(process.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let frame = CommandFrame::everywhere("/definitely/not/a/binary");
        let command = resolve(&frame, Platform::Linux, Path::new("/tmp"), 67).unwrap();
        let err = spawn(&command, OutputMode::Separate, 16).err().unwrap();
        assert!(matches!(err, Error::Spawn { ref program, .. } if program == "/definitely/not/a/binary"));
    }

    #[tokio::test]
    async fn killed_child_reports_signal_code() {
        let mut process = spawn_separate(&sh("kill -9 $$"), 16).unwrap();
        drain(&mut process).await;
        assert_eq!(process.wait().await.unwrap(), 128 + 9);
    }

    #[tokio::test]
    async fn merged_output_keeps_write_order() {
        let script = "i=0; while [ $i -lt 200 ]; do echo $i; i=$((i+1)); echo $i >&2; i=$((i+1)); done";
        let mut process = spawn(&sh(script), OutputMode::Merged, 16).unwrap();
        let chunks = drain(&mut process).await;
        assert_eq!(process.wait().await.unwrap(), 0);

        assert!(chunks.iter().all(|c| c.channel == OutputChannel::Stdout));
        let lines: Vec<String> = chunks
            .iter()
            .map(|c| String::from_utf8_lossy(&c.data).trim_end().to_string())
            .collect();
        let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn merged_pipe_closes_when_child_exits() {
        let mut process = spawn(&sh("echo only"), OutputMode::Merged, 16).unwrap();
        let chunks = tokio::time::timeout(std::time::Duration::from_secs(5), drain(&mut process))
            .await
            .expect("merged pipe should reach end of file");
        assert_eq!(chunks.len(), 1);
        assert_eq!(process.wait().await.unwrap(), 0);
    }
}
