//! gRPC service implementation for `RunCommand`.
//!
//! This module defines [`FlasherdService`], the concrete implementation of
//! the [`Flasherd`] gRPC service defined in the protobuf specification.
//!
//! ## Responsibilities
//!
//! - Recover the request ID counter from the staging directory on startup.
//! - Assign each call its ID and hand it to the worker pool.
//! - Bridge the worker's response channel to the gRPC response stream.
//! - Handle graceful shutdown.

use crate::server::{
    allocator::RequestIdAllocator,
    config::ServerConfig,
    pool::manager::WorkerPool,
    streaming::{coordinator::InvocationContext, request::WorkRequest},
    telemetry::increment_invocations,
};
use core::pin::Pin;
use flasherd_core::{
    Error,
    proto::{
        RunCommandRequest, RunCommandResponse,
        flasherd_server::{Flasherd, FlasherdServer},
    },
};
use std::{sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming, codec::CompressionEncoding};

/// The `flasherd` service.
///
/// Cloning is cheap: clones share the allocator and the worker pool.
#[derive(Clone)]
pub struct FlasherdService {
    config: ServerConfig,
    allocator: Arc<RequestIdAllocator>,
    worker_pool: Arc<WorkerPool>,
}

impl FlasherdService {
    /// Creates the service and spawns its worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Staging`] if the staging directory cannot be created
    /// or listed.
    pub async fn new(config: ServerConfig) -> flasherd_core::Result<Self> {
        let allocator = RequestIdAllocator::recover(&config.staging_dir).await?;
        tracing::info!(
            "Staging into {} starting at request {}",
            config.staging_dir.display(),
            allocator.peek()
        );

        let ctx = Arc::new(InvocationContext::from(&config));
        let worker_pool = WorkerPool::spawn(
            ctx,
            config.num_workers,
            config.queue_size,
            config.shutdown_timeout,
        );

        Ok(Self {
            config,
            allocator: Arc::new(allocator),
            worker_pool: Arc::new(worker_pool),
        })
    }

    pub fn allocator(&self) -> &RequestIdAllocator {
        &self.allocator
    }

    /// Initiates a graceful shutdown of the worker pool.
    ///
    /// New calls are refused, running ones get `shutdown_timeout` seconds to
    /// finish, and whatever is still running after that is killed.
    pub async fn shutdown(&self) -> flasherd_core::Result<()> {
        self.worker_pool.shutdown().await
    }
}

#[tonic::async_trait]
impl Flasherd for FlasherdService {
    type RunCommandStream = Pin<Box<dyn Stream<Item = Result<RunCommandResponse, Status>> + Send>>;

    /// Accepts a call, assigns it a request ID and queues it for a worker.
    ///
    /// The response stream is returned immediately; frames appear on it as
    /// the worker produces them. Errors that happen after this point arrive
    /// as the stream's terminal status.
    #[tracing::instrument(skip_all)]
    async fn run_command(
        &self,
        request: Request<Streaming<RunCommandRequest>>,
    ) -> Result<Response<Self::RunCommandStream>, Status> {
        let accepted_at = Instant::now();
        let id = self.allocator.next_id()?;
        increment_invocations();
        tracing::info!("Accepted invocation {id}");

        let (resp_tx, resp_rx) =
            mpsc::channel::<Result<RunCommandResponse, Status>>(self.config.stream_buffer_size);

        self.worker_pool
            .submit(WorkRequest::Invocation {
                id,
                inbound: Box::pin(request.into_inner()),
                resp_tx,
                accepted_at,
            })
            .await
            .map_err(|e: Error| {
                tracing::warn!("Rejected invocation {id}: {e}");
                Status::from(e)
            })?;

        Ok(Response::new(Box::pin(ReceiverStream::new(resp_rx))))
    }
}

/// Wraps `service` in the generated tonic server with compression enabled.
pub fn build_service(service: FlasherdService) -> FlasherdServer<FlasherdService> {
    FlasherdServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_continue_after_existing_staged_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("120_zephyr_hex"), b"old").unwrap();

        let service = FlasherdService::new(ServerConfig::with_staging_dir(dir.path()))
            .await
            .unwrap();
        assert_eq!(service.allocator().peek(), 121);
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn creates_missing_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        let staging = dir.path().join("nested").join("staging");

        let service = FlasherdService::new(ServerConfig::with_staging_dir(&staging))
            .await
            .unwrap();
        assert!(staging.is_dir());
        assert_eq!(service.allocator().peek(), 67);
        service.shutdown().await.unwrap();
    }
}
