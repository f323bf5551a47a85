//! Per-invocation request handling.
//!
//! - [`request`] - messages sent to pool workers.
//! - [`coordinator`] - stage, resolve, run and report one invocation.
//! - [`processor`] - forwards child output to the response stream.

pub mod coordinator;
pub mod processor;
pub mod request;
