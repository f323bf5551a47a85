//! Shared protocol definitions used by both the daemon and its clients.
//!
//! - [`error`] - Service error type and its gRPC status mapping.
//! - [`frame`] - Typed request/response frames.
//! - [`types`] - Constants, staged file naming and [`types::Platform`].
//! - [`proto`] - Generated protobuf messages and gRPC stubs.

pub mod error;
pub mod frame;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from
/// `proto/flasherd.proto`.
///
/// ## Service
///
/// - `RunCommand` - bidirectional stream. The client sends zero or more
///   [`BinaryChunk`](proto::BinaryChunk) frames followed by one
///   [`Command`](proto::Command) frame; the server answers with the
///   command's output frames and a final exit code.
pub mod proto {
    tonic::include_proto!("flasherd");

    /// Encoded descriptor set used to serve gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("flasherd_descriptor");
}
