//! gRPC service implementation.
//!
//! This module contains the client-facing `RunCommand` handler. It allocates
//! the invocation ID and hands the call to the worker pool; everything after
//! that happens in [`crate::server::streaming`].
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`FlasherdService`).

pub mod handler;
