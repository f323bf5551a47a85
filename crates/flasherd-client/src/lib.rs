#![doc = include_str!("../README.md")]

mod client;
mod error;
pub mod response;
pub mod stream;

pub use client::{FlasherdClient, health_command};
pub use error::{ClientError, Result};
pub use response::Outcome;
