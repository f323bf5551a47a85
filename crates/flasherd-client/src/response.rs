//! Consumes the response stream of a call.

use crate::error::{ClientError, Result};
use flasherd_core::{frame::InboundFrame, proto::RunCommandResponse};
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tonic::Status;

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command ran and exited with this code.
    Exited(i32),
    /// The stream ended without an exit frame, e.g. a staging-only call.
    NoExit,
}

impl Outcome {
    pub fn exit_code(self) -> Option<i32> {
        match self {
            Outcome::Exited(code) => Some(code),
            Outcome::NoExit => None,
        }
    }

    pub fn success(self) -> bool {
        self == Outcome::Exited(0)
    }
}

/// Writes stdout and stderr frames to their sinks as they arrive, until the
/// exit frame. Anything after the exit frame is not read.
///
/// # Errors
///
/// A failed stream is returned as [`ClientError::Unreachable`] for
/// `UNAVAILABLE` and [`ClientError::Transport`] otherwise.
pub async fn handle_responses<S, O, E>(responses: S, stdout: &mut O, stderr: &mut E) -> Result<Outcome>
where
    S: Stream<Item = core::result::Result<RunCommandResponse, Status>>,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut responses = core::pin::pin!(responses);

    while let Some(resp) = responses.next().await {
        let resp = resp.map_err(|status| {
            if status.code() != tonic::Code::Unavailable {
                tracing::error!("Call failed: {status:?}");
            }
            ClientError::from(status)
        })?;

        match InboundFrame::try_from(resp)? {
            InboundFrame::Stdout(data) => write_frame(stdout, &data).await?,
            InboundFrame::Stderr(data) => write_frame(stderr, &data).await?,
            InboundFrame::Exit(code) => {
                tracing::debug!("Remote command exited with {code}");
                return Ok(Outcome::Exited(code));
            }
        }
    }

    tracing::debug!("Response stream ended without an exit frame");
    Ok(Outcome::NoExit)
}

async fn write_frame<W: AsyncWrite + Unpin>(sink: &mut W, data: &[u8]) -> Result<()> {
    sink.write_all(data).await.map_err(ClientError::Output)?;
    sink.flush().await.map_err(ClientError::Output)
}
