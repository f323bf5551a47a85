use crate::server::{
    config::OutputMode,
    runner::{OutputChannel, OutputChunk, RunningProcess},
    streaming::request::ResponseSender,
    telemetry::increment_output_frames,
};
use flasherd_core::{Error, Result, frame::InboundFrame};
use tokio_util::sync::CancellationToken;

impl OutputMode {
    /// The response frame a chunk of child output is reported as.
    pub fn frame(self, chunk: OutputChunk) -> InboundFrame {
        match (self, chunk.channel) {
            (OutputMode::Separate, OutputChannel::Stderr) => InboundFrame::Stderr(chunk.data),
            _ => InboundFrame::Stdout(chunk.data),
        }
    }
}

/// Forwards a running child's output to the client and returns its exit
/// code.
///
/// Each chunk is sent as soon as the runner produces it. The child is killed
/// if the client stops listening (`resp_tx` closes) or `cancel` fires
/// before it exits.
///
/// # Errors
///
/// - [`Error::RequestCancelled`] if the client went away.
/// - [`Error::ServiceShutdown`] if `cancel` fired.
/// - [`Error::ProcessIo`] if reading output or waiting on the child failed.
pub async fn stream_process(
    mut process: RunningProcess,
    mode: OutputMode,
    resp_tx: &ResponseSender,
    cancel: &CancellationToken,
) -> Result<i32> {
    loop {
        let chunk = tokio::select! {
            () = cancel.cancelled() => {
                process.kill().await;
                return Err(Error::ServiceShutdown);
            }
            () = resp_tx.closed() => {
                tracing::info!("Client disconnected, killing child {:?}", process.id());
                process.kill().await;
                return Err(Error::RequestCancelled);
            }
            chunk = process.next_output() => chunk,
        };

        match chunk {
            Some(Ok(chunk)) => {
                tracing::trace!("Got {} output bytes", chunk.data.len());
                if resp_tx.send(Ok(mode.frame(chunk).into())).await.is_err() {
                    process.kill().await;
                    return Err(Error::RequestCancelled);
                }
                increment_output_frames();
            }
            Some(Err(e)) => {
                process.kill().await;
                return Err(e);
            }
            None => break,
        }
    }

    // Both pipes are closed, but the child may have handed them to a
    // descendant and kept running.
    tokio::select! {
        () = cancel.cancelled() => {
            process.kill().await;
            Err(Error::ServiceShutdown)
        }
        () = resp_tx.closed() => {
            process.kill().await;
            Err(Error::RequestCancelled)
        }
        code = process.wait() => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn chunk(channel: OutputChannel, data: &'static [u8]) -> OutputChunk {
        OutputChunk {
            channel,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn separate_mode_keeps_stderr() {
        assert_eq!(
            OutputMode::Separate.frame(chunk(OutputChannel::Stderr, b"e\n")),
            InboundFrame::Stderr(Bytes::from_static(b"e\n"))
        );
        assert_eq!(
            OutputMode::Separate.frame(chunk(OutputChannel::Stdout, b"o\n")),
            InboundFrame::Stdout(Bytes::from_static(b"o\n"))
        );
    }

    #[test]
    fn merged_mode_reports_everything_as_stdout() {
        assert_eq!(
            OutputMode::Merged.frame(chunk(OutputChannel::Stderr, b"e\n")),
            InboundFrame::Stdout(Bytes::from_static(b"e\n"))
        );
    }
}
