use super::{
    processor::stream_process,
    request::{InboundStream, ResponseSender},
};
use crate::server::{
    config::{OutputMode, ServerConfig},
    resolver::resolve,
    runner,
    staging::Stager,
    telemetry::record_staged_bytes,
};
use flasherd_core::{
    Error, Result,
    frame::{CommandFrame, InboundFrame, OutboundFrame},
    types::{Platform, RequestId},
};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Settings every invocation runs with, shared by all workers.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub staging_dir: PathBuf,
    pub os: String,
    pub output_mode: OutputMode,
    pub max_staged_bytes: Option<u64>,
    pub output_buffer: usize,
}

impl From<&ServerConfig> for InvocationContext {
    fn from(config: &ServerConfig) -> Self {
        Self {
            staging_dir: config.staging_dir.clone(),
            os: config.os.clone(),
            output_mode: config.output_mode,
            max_staged_bytes: config.max_staged_bytes,
            output_buffer: config.stream_buffer_size,
        }
    }
}

/// A call whose staging phase has finished.
#[derive(Debug)]
pub struct Invocation {
    pub id: RequestId,
    pub staged_files: BTreeMap<String, PathBuf>,
}

/// Runs one `RunCommand` invocation to completion.
///
/// 1. Staging: chunk frames are appended to staged files until the first
///    command frame, or until the client closes its stream.
/// 2. Resolving: the command is resolved for the daemon's platform.
/// 3. Running: the child is spawned and its output forwarded as it appears.
/// 4. Done: a single exit frame is sent.
///
/// Frames after the command frame are never read. Returns `Ok(None)` when the
/// client closed its stream without a command frame; no process runs and no
/// exit frame is sent in that case.
///
/// # Errors
///
/// Any error aborts this invocation only. Nothing is sent on `resp_tx` for
/// an error; the caller decides how to surface it.
pub async fn run_invocation(
    id: RequestId,
    mut inbound: InboundStream,
    resp_tx: &ResponseSender,
    ctx: &InvocationContext,
    cancel: &CancellationToken,
) -> Result<Option<i32>> {
    let mut stager = Stager::new(&ctx.staging_dir, id, ctx.max_staged_bytes);

    let command: Option<CommandFrame> = loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return Err(Error::ServiceShutdown),
            next = inbound.next() => next,
        };
        let Some(req) = next else { break None };

        match OutboundFrame::try_from(req?)? {
            OutboundFrame::Chunk(chunk) => {
                tracing::trace!(
                    "Chunk for {} ({} bytes)",
                    chunk.binary_name,
                    chunk.data.len()
                );
                stager.append(&chunk).await?;
            }
            OutboundFrame::Command(command) => break Some(command),
        }
    };

    let bytes_staged = stager.bytes_staged();
    let invocation = Invocation {
        id,
        staged_files: stager.finish().await?,
    };
    record_staged_bytes(bytes_staged);
    tracing::debug!("Staged {bytes_staged} bytes: {invocation:?}");

    let Some(command) = command else {
        tracing::info!("Request stream closed without a command");
        return Ok(None);
    };
    tracing::info!("Received command: {command:?}");

    let platform = Platform::from_os(&ctx.os)?;
    let resolved = resolve(&command, platform, &ctx.staging_dir, invocation.id)?;

    let process = runner::spawn(&resolved, ctx.output_mode, ctx.output_buffer)?;
    let code = stream_process(process, ctx.output_mode, resp_tx, cancel).await?;

    resp_tx
        .send(Ok(InboundFrame::Exit(code).into()))
        .await
        .map_err(|_| Error::RequestCancelled)?;

    Ok(Some(code))
}
