use crate::{
    error::{ClientError, Result},
    response::{Outcome, handle_responses},
    stream::{Binary, build_frames},
};
use flasherd_core::{
    frame::CommandFrame,
    proto::{RunCommandRequest, flasherd_client},
};
use tokio::io::AsyncWrite;
use tonic::{
    codec::CompressionEncoding,
    transport::{Channel, Endpoint},
};

/// Command used to check that the daemon can run commands at all.
///
/// `cmd /c dir` on Windows, `echo` elsewhere. The arguments are shared by
/// every platform, so `echo` simply prints them.
pub fn health_command() -> CommandFrame {
    CommandFrame::new("cmd", "echo", "echo")
        .literal("/c")
        .literal("dir")
}

/// Connection to one `flasherd` daemon.
#[derive(Debug, Clone)]
pub struct FlasherdClient {
    endpoint: String,
    inner: flasherd_client::FlasherdClient<Channel>,
}

impl FlasherdClient {
    /// Connects to the daemon at `endpoint`, e.g. `http://127.0.0.1:6767`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Unreachable`] if nothing answers at `endpoint`.
    pub async fn connect(endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|source| ClientError::InvalidEndpoint {
                endpoint: endpoint.clone(),
                source,
            })?
            .connect()
            .await
            .map_err(|e| {
                tracing::debug!("Connecting to {endpoint} failed: {e:?}");
                ClientError::Unreachable {
                    detail: e.to_string(),
                }
            })?;

        let inner = flasherd_client::FlasherdClient::new(channel)
            .accept_compressed(CompressionEncoding::Zstd)
            .accept_compressed(CompressionEncoding::Gzip);

        Ok(Self { endpoint, inner })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stages `binaries` and runs `command` against them, writing the
    /// command's output to `stdout` and `stderr` as it arrives.
    ///
    /// Arguments of `command` may refer to any of `binaries` by name with
    /// [`Argument::BinaryRef`](flasherd_core::frame::Argument::BinaryRef).
    #[tracing::instrument(skip_all, fields(endpoint = %self.endpoint))]
    pub async fn run<O, E>(
        &mut self,
        binaries: &[Binary],
        command: CommandFrame,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<Outcome>
    where
        O: AsyncWrite + Unpin,
        E: AsyncWrite + Unpin,
    {
        let requests: Vec<RunCommandRequest> = build_frames(binaries, command)
            .await?
            .into_iter()
            .map(RunCommandRequest::from)
            .collect();
        tracing::debug!("Sending {} frames", requests.len());

        let responses = self
            .inner
            .run_command(tokio_stream::iter(requests))
            .await?
            .into_inner();

        handle_responses(responses, stdout, stderr).await
    }

    /// Runs [`health_command`] and discards its output.
    pub async fn health_check(&mut self) -> Result<Outcome> {
        self.run(
            &[],
            health_command(),
            &mut tokio::io::sink(),
            &mut tokio::io::sink(),
        )
        .await
    }
}
