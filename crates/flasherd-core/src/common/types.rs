//! # Shared constants and naming rules
//!
//! Both sides of the protocol agree on:
//!
//! - [`DEFAULT_SERVER_ADDR`] / [`DEFAULT_ENDPOINT`] - the single well-known
//!   loopback endpoint.
//! - [`CHUNK_SIZE`] - the block size used when splitting binaries into
//!   chunk frames.
//! - [`staged_file_name`] - the `"<id>_<name>"` layout of the staging
//!   directory, which is also how request IDs survive restarts.
//! - [`Platform`] - the three operating systems a command frame can target.

use crate::{Error, Result};
use core::fmt;

/// Identifier assigned to each invocation by the daemon.
pub type RequestId = u64;

/// The first request ID handed out by a daemon with an empty staging
/// directory.
pub const INITIAL_REQUEST_ID: RequestId = 67;

/// Size of the blocks a client splits staged binaries into. The final block
/// of a file may be shorter.
pub const CHUNK_SIZE: usize = 4096;

/// Address the daemon listens on by default.
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:6767";

/// URI clients connect to by default.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:6767";

/// Name of the staged file holding binary `name` for invocation `id`.
pub fn staged_file_name(id: RequestId, name: &str) -> String {
    format!("{id}_{name}")
}

/// Splits a staged file name back into its request ID and binary name.
///
/// Returns `None` for names that were not produced by [`staged_file_name`].
pub fn parse_staged_file_name(file_name: &str) -> Option<(RequestId, &str)> {
    let (id, name) = file_name.split_once('_')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((id.parse().ok()?, name))
}

/// Rejects binary names that would escape the staging directory or collide
/// with its naming scheme.
pub fn validate_binary_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid("Binary name must not be empty"));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(Error::invalid(format!("Invalid binary name: {name:?}")));
    }
    Ok(())
}

/// Operating systems a command frame carries a command for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Windows, Platform::MacOs, Platform::Linux];

    /// The platform this binary was compiled for.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedPlatform`] on any other OS.
    pub fn current() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    /// Maps an OS identifier as reported by [`std::env::consts::OS`].
    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "windows" => Ok(Platform::Windows),
            "macos" => Ok(Platform::MacOs),
            "linux" => Ok(Platform::Linux),
            other => Err(Error::UnsupportedPlatform {
                os: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Windows => write!(f, "windows"),
            Platform::MacOs => write!(f, "macos"),
            Platform::Linux => write!(f, "linux"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_names_round_trip() {
        let name = staged_file_name(67, "zephyr_hex");
        assert_eq!(name, "67_zephyr_hex");
        assert_eq!(parse_staged_file_name(&name), Some((67, "zephyr_hex")));
    }

    #[test]
    fn foreign_names_are_not_parsed() {
        assert_eq!(parse_staged_file_name("readme.txt"), None);
        assert_eq!(parse_staged_file_name("_payload"), None);
        assert_eq!(parse_staged_file_name("-3_payload"), None);
        assert_eq!(parse_staged_file_name("12a_payload"), None);
    }

    #[test]
    fn binary_names_cannot_traverse() {
        assert!(validate_binary_name("payload").is_ok());
        assert!(validate_binary_name("zephyr.hex").is_ok());
        for bad in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", "nul\0"] {
            assert!(validate_binary_name(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn unknown_os_is_rejected() {
        assert_eq!(Platform::from_os("linux").unwrap(), Platform::Linux);
        assert_eq!(Platform::from_os("macos").unwrap(), Platform::MacOs);
        assert_eq!(Platform::from_os("windows").unwrap(), Platform::Windows);
        assert!(matches!(
            Platform::from_os("freebsd"),
            Err(Error::UnsupportedPlatform { os }) if os == "freebsd"
        ));
    }
}
