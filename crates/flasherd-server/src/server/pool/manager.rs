//! Bounded pool of invocation workers.
//!
//! This module defines the [`WorkerPool`] struct, which owns a fixed number
//! of asynchronous workers. Invocations are pushed onto one bounded queue
//! that all workers pull from, so a long-running command only occupies its
//! own worker while the others keep serving new calls. Coordinated shutdown
//! goes through a shared [`CancellationToken`].

use super::worker::worker_loop;
use crate::server::streaming::{coordinator::InvocationContext, request::WorkRequest};
use core::time::Duration;
use flasherd_core::Error;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// A cooperative pool of asynchronous workers that run invocations.
pub struct WorkerPool {
    queue: mpsc::Sender<WorkRequest>,
    num_workers: usize,
    inflight: Arc<AtomicUsize>,
    accepting: AtomicBool,
    shutdown_token: CancellationToken,
    shutdown_timeout: u64,
}

impl WorkerPool {
    /// Spawns `num_workers` workers sharing a queue of `queue_size` pending
    /// invocations.
    pub fn spawn(
        ctx: Arc<InvocationContext>,
        num_workers: usize,
        queue_size: usize,
        shutdown_timeout: u64,
    ) -> Self {
        let (queue, rx) = mpsc::channel(queue_size.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let inflight = Arc::new(AtomicUsize::new(0));
        let shutdown_token = CancellationToken::new();

        for worker_id in 0..num_workers {
            tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&ctx),
                Arc::clone(&inflight),
                shutdown_token.clone(),
            ));
        }

        Self {
            queue,
            num_workers,
            inflight,
            accepting: AtomicBool::new(true),
            shutdown_token,
            shutdown_timeout,
        }
    }

    /// Number of invocations currently being run by a worker.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Queues a [`WorkRequest`] for the next idle worker. Waits if the queue
    /// is full.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The service is shutting down.
    /// - The queue is closed.
    pub async fn submit(&self, request: WorkRequest) -> Result<(), Error> {
        if !self.accepting.load(Ordering::Acquire) || self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        self.queue
            .send(request)
            .await
            .map_err(|_| Error::ChannelError {
                context: "Worker queue closed".to_string(),
            })
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Stops accepting new invocations.
    /// - Waits up to `shutdown_timeout` seconds for running ones to finish.
    /// - Cancels the shared [`CancellationToken`], killing any children that
    ///   are still running.
    /// - Sends a [`WorkRequest::Shutdown`] per worker and waits (up to 3
    ///   seconds each) for acknowledgements.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        tracing::info!("Refusing new invocations");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for running invocations to drain ===
        tracing::info!("Draining running invocations ({} active)", self.inflight());
        let drain_result = timeout(Duration::from_secs(self.shutdown_timeout), async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => tracing::debug!("All invocations drained successfully"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} invocations still running)",
                self.inflight()
            ),
        }

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining invocations via shutdown token");
        self.shutdown_token.cancel();

        // === Phase 3: Notify workers to shut down ===
        tracing::debug!("Notifying all workers to shut down");
        let mut shutdown_handles = Vec::with_capacity(self.num_workers);

        for i in 0..self.num_workers {
            let (tx, rx) = oneshot::channel();
            if let Err(e) = self.queue.send(WorkRequest::Shutdown { response: tx }).await {
                tracing::error!("Failed to send shutdown to worker {i}: {e}");
            } else {
                shutdown_handles.push((i, rx));
            }
        }

        let timeout_futures = shutdown_handles.into_iter().map(|(i, rx)| async move {
            match timeout(Duration::from_secs(3), rx).await {
                Ok(Ok(())) => tracing::trace!("Worker shutdown acknowledged ({i})"),
                Ok(Err(e)) => tracing::error!("Worker shutdown returned error ({i}): {e}"),
                Err(_) => tracing::warn!("Worker shutdown timed out ({i})"),
            }
        });

        futures::future::join_all(timeout_futures).await;

        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ServerConfig;
    use flasherd_core::proto::RunCommandRequest;
    use tonic::Status;
    use std::time::Instant;

    fn pool(dir: &std::path::Path, workers: usize) -> WorkerPool {
        let ctx = Arc::new(InvocationContext::from(&ServerConfig::with_staging_dir(dir)));
        WorkerPool::spawn(ctx, workers, 4, 1)
    }

    #[tokio::test]
    async fn rejects_work_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), 2);
        pool.shutdown().await.unwrap();

        let (resp_tx, _resp_rx) = mpsc::channel(1);
        let err = pool
            .submit(WorkRequest::Invocation {
                id: 67,
                inbound: Box::pin(futures::stream::empty::<Result<RunCommandRequest, Status>>()),
                resp_tx,
                accepted_at: Instant::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceShutdown));
    }

    #[tokio::test]
    async fn submitted_invocation_runs_and_releases_worker() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool(dir.path(), 1);

        for id in [67, 68] {
            let (resp_tx, mut resp_rx) = mpsc::channel(1);
            pool.submit(WorkRequest::Invocation {
                id,
                inbound: Box::pin(futures::stream::empty::<Result<RunCommandRequest, Status>>()),
                resp_tx,
                accepted_at: Instant::now(),
            })
            .await
            .unwrap();
            // Staging-only call: the stream closes without frames.
            assert!(resp_rx.recv().await.is_none());
        }
        assert_eq!(pool.inflight(), 0);
    }
}
