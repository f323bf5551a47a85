//! Bounded pool of workers that run invocations.
//!
//! - [`manager`] - [`manager::WorkerPool`], submission and shutdown.
//! - [`worker`] - the loop each worker task runs.

pub mod manager;
pub mod worker;
