//! Turns a [`CommandFrame`] into the argument vector to execute.
//!
//! Resolution is a pure function of the frame, the target [`Platform`], the
//! staging directory and the request ID, so every platform can be tested
//! from any host.

use crate::server::staging::staged_path;
use flasherd_core::{
    Error, Result,
    frame::{Argument, CommandFrame},
    types::{Platform, RequestId, validate_binary_name},
};
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// A command ready to be spawned. `argv[0]` is the executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    argv: Vec<OsString>,
}

impl ResolvedCommand {
    pub fn program(&self) -> &OsStr {
        &self.argv[0]
    }

    pub fn args(&self) -> &[OsString] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }
}

/// Resolves `frame` for `platform` within invocation `id`.
///
/// `BinaryRef` arguments become staged paths whether or not the binary was
/// actually staged; a missing file surfaces when the child opens it.
///
/// # Errors
///
/// - [`Error::StdinUnsupported`] if the frame requests stdin. Checked first.
/// - [`Error::InvalidRequest`] if there is no command for `platform` or a
///   binary reference is not a plain file name.
pub fn resolve(
    frame: &CommandFrame,
    platform: Platform,
    staging_dir: &Path,
    id: RequestId,
) -> Result<ResolvedCommand> {
    if frame.stdin_requested {
        return Err(Error::StdinUnsupported);
    }

    let command = frame.command_for(platform);
    if command.trim().is_empty() {
        return Err(Error::invalid(format!("Missing {platform} command")));
    }

    let mut argv = Vec::with_capacity(frame.args.len() + 1);
    argv.push(OsString::from(command));
    for arg in &frame.args {
        match arg {
            Argument::Literal(text) => argv.push(OsString::from(text)),
            Argument::BinaryRef(name) => {
                validate_binary_name(name)?;
                argv.push(staged_path(staging_dir, id, name).into_os_string());
            }
        }
    }

    Ok(ResolvedCommand { argv })
}
