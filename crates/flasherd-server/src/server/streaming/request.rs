use flasherd_core::{
    proto::{RunCommandRequest, RunCommandResponse},
    types::RequestId,
};
use futures::Stream;
use std::pin::Pin;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tonic::Status;

/// Inbound half of a `RunCommand` call.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<RunCommandRequest, Status>> + Send>>;

/// Sender feeding the outbound half of a `RunCommand` call.
pub type ResponseSender = mpsc::Sender<Result<RunCommandResponse, Status>>;

/// A message sent from the service handler to the worker pool.
///
/// [`WorkRequest`]s travel over a single bounded queue shared by all
/// workers; whichever worker is idle picks up the next one.
pub enum WorkRequest {
    /// Run one invocation to completion.
    ///
    /// - `id`: Request ID allocated for this call.
    /// - `inbound`: The client's frame stream.
    /// - `resp_tx`: Output channel for response frames.
    /// - `accepted_at`: When the call was accepted, for duration metrics.
    Invocation {
        id: RequestId,
        inbound: InboundStream,
        resp_tx: ResponseSender,
        accepted_at: Instant,
    },
    /// Stop the receiving worker and acknowledge on `response`.
    Shutdown { response: oneshot::Sender<()> },
}
