//! # `flasherd-server`: staging and command execution daemon
//!
//! Accepts `RunCommand` streams, stages the binaries they carry under a
//! per-invocation ID, runs the requested command and streams its output back
//! while it runs.
//!
//! ## Module Overview
//!
//! - [`server::config`] - CLI/env configuration.
//! - [`server::allocator`] - request IDs that survive restarts.
//! - [`server::staging`] - appends chunk frames to staged files.
//! - [`server::resolver`] - picks the platform command and resolves binary
//!   references.
//! - [`server::runner`] - spawns the child and produces its output.
//! - [`server::streaming`] - the per-invocation state machine.
//! - [`server::pool`] - bounded worker pool running invocations.
//! - [`server::service`] - the `tonic` service entry point.
//! - [`server::telemetry`] - logging, optional OpenTelemetry export.

pub mod server;
