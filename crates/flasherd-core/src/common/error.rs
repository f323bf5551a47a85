//! Error types for the command execution service.
//!
//! This module defines the central `Error` enum, which captures every way a
//! single invocation can fail. It implements `From<Error>` for
//! `tonic::Status` so failures propagate to clients as gRPC statuses rather
//! than as process exit codes.
//!
//! ## Error Cases
//! - `ChannelError`: An internal communication failure between tasks.
//! - `InvalidRequest`: A malformed frame, binary name or command.
//! - `Staging`: A staged file could not be created or appended to.
//! - `StagingLimit`: The invocation staged more bytes than allowed.
//! - `UnsupportedPlatform`: The daemon runs on an OS it has no command for.
//! - `StdinUnsupported`: The command asked for interactive stdin.
//! - `Spawn`: The resolved executable could not be launched.
//! - `ProcessIo`: Reading output from or waiting on the child failed.
//! - `IdExhausted`: No request IDs are left.
//! - `RequestCancelled`: The client went away mid-call.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.
//! - `Transport`: The inbound request stream failed.

use std::io;
use std::path::PathBuf;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the command execution service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The client sent something the protocol does not allow.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Creating or appending to a staged binary failed.
    #[error("Failed to stage {}: {source}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The invocation tried to stage more than the configured limit.
    #[error("Staged binaries exceed the limit of {limit} bytes")]
    StagingLimit { limit: u64 },

    /// The daemon's OS matches none of the supported platforms.
    #[error("Unknown OS: {os}")]
    UnsupportedPlatform { os: String },

    /// Interactive stdin was requested.
    #[error("stdin streaming is currently unsupported")]
    StdinUnsupported,

    /// The resolved command could not be launched.
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Streaming output from, or waiting on, the child failed.
    #[error("{context}: {source}")]
    ProcessIo {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The request ID counter cannot be advanced any further.
    #[error("Request ID space exhausted")]
    IdExhausted,

    /// The client aborted the request.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The inbound request stream returned an error.
    #[error("Transport error: {0}")]
    Transport(#[from] Status),
}

impl Error {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            err @ Error::Staging { .. } => Status::internal(err.to_string()),
            err @ Error::StagingLimit { .. } => Status::resource_exhausted(err.to_string()),
            err @ Error::UnsupportedPlatform { .. } => Status::internal(err.to_string()),
            err @ Error::StdinUnsupported => Status::unimplemented(err.to_string()),
            err @ Error::Spawn { .. } => Status::failed_precondition(err.to_string()),
            err @ Error::ProcessIo { .. } => Status::internal(err.to_string()),
            Error::IdExhausted => Status::resource_exhausted("Request ID space exhausted"),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::Transport(status) => status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn spawn_failure_is_not_reported_as_unavailable() {
        let status: Status = Error::Spawn {
            program: "/nope".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        }
        .into();
        assert_eq!(status.code(), Code::FailedPrecondition);
        assert!(status.message().contains("/nope"));
    }

    #[test]
    fn stdin_maps_to_unimplemented() {
        let status: Status = Error::StdinUnsupported.into();
        assert_eq!(status.code(), Code::Unimplemented);
    }

    #[test]
    fn transport_status_passes_through() {
        let status: Status = Error::Transport(Status::data_loss("gone")).into();
        assert_eq!(status.code(), Code::DataLoss);
        assert_eq!(status.message(), "gone");
    }
}
