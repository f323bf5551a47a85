pub mod allocator;
pub mod config;
pub mod pool;
pub mod resolver;
pub mod runner;
pub mod service;
pub mod staging;
pub mod streaming;
pub mod telemetry;
