use std::path::PathBuf;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, ClientError>;

/// Errors returned by [`FlasherdClient`](crate::FlasherdClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The daemon could not be reached, or refused the call because it is
    /// shutting down.
    #[error("flasherd might not be running")]
    Unreachable { detail: String },

    #[error("Invalid endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: tonic::transport::Error,
    },

    /// The call failed with a status other than `UNAVAILABLE`. Server-side
    /// failures (staging, resolution, spawn) arrive this way.
    #[error("flasherd returned {}: {}", .0.code(), .0.message())]
    Transport(Status),

    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write command output: {0}")]
    Output(#[source] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] flasherd_core::Error),
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Unavailable => ClientError::Unreachable {
                detail: status.message().to_string(),
            },
            _ => ClientError::Transport(status),
        }
    }
}

impl ClientError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Unreachable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_is_unreachable() {
        let err = ClientError::from(Status::unavailable("connection refused"));
        assert!(err.is_unreachable());
        assert_eq!(err.to_string(), "flasherd might not be running");
    }

    #[test]
    fn other_statuses_pass_through() {
        let err = ClientError::from(Status::failed_precondition("Failed to spawn"));
        assert!(
            matches!(&err, ClientError::Transport(s) if s.code() == Code::FailedPrecondition)
        );
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
