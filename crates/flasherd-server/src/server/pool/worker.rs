use crate::server::{
    streaming::{
        coordinator::{InvocationContext, run_invocation},
        request::WorkRequest,
    },
    telemetry::{
        decrement_invocations_inflight, increment_invocation_errors,
        increment_invocations_inflight, record_invocation_duration,
    },
};
use flasherd_core::Error;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Worker task responsible for running [`WorkRequest`]s.
///
/// Workers share one queue; each takes the next request when idle and runs
/// it to completion before taking another, which bounds the number of
/// concurrently running invocations to the number of workers.
///
/// Runs until it receives [`WorkRequest::Shutdown`] or the queue closes.
pub async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<WorkRequest>>>,
    ctx: Arc<InvocationContext>,
    inflight: Arc<AtomicUsize>,
    shutdown_token: CancellationToken,
) {
    tracing::trace!("Worker {worker_id} started");

    loop {
        // Holding the lock while waiting is fine: only idle workers wait.
        let work = { rx.lock().await.recv().await };
        let Some(work) = work else { break };

        match work {
            WorkRequest::Invocation {
                id,
                inbound,
                resp_tx,
                accepted_at,
            } => {
                inflight.fetch_add(1, Ordering::AcqRel);
                increment_invocations_inflight();

                let span = tracing::info_span!("invocation", id, worker = worker_id);
                async {
                    match run_invocation(id, inbound, &resp_tx, &ctx, &shutdown_token).await {
                        Ok(Some(code)) => tracing::info!("Process terminated with code {code}"),
                        Ok(None) => tracing::info!("Invocation ended without a command"),
                        Err(Error::RequestCancelled) => {
                            increment_invocation_errors();
                            tracing::info!("Client went away");
                        }
                        Err(e) => {
                            increment_invocation_errors();
                            tracing::error!("Reporting error: {e}");
                            // The client may already be gone.
                            if let Err(e) = resp_tx.send(Err(e.into())).await {
                                tracing::debug!("Failed to forward error: {e}");
                            }
                        }
                    }
                }
                .instrument(span)
                .await;

                record_invocation_duration(accepted_at.elapsed().as_millis() as f64);
                decrement_invocations_inflight();
                inflight.fetch_sub(1, Ordering::AcqRel);
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
