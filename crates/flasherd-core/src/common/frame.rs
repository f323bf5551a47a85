//! Typed frames exchanged over the `RunCommand` stream.
//!
//! The generated protobuf messages model every frame as a `oneof`, so an
//! empty message is representable on the wire. The types here are what the
//! daemon and client actually operate on; conversion from the wire rejects
//! frames that carry no payload.
//!
//! Client to server: [`OutboundFrame`], either a [`ChunkFrame`] or the final
//! [`CommandFrame`]. Server to client: [`InboundFrame`].

use crate::{
    Error, Result,
    proto::{
        Arg, BinaryChunk, Command, RunCommandRequest, RunCommandResponse, arg,
        run_command_request, run_command_response,
    },
    types::Platform,
};
use bytes::Bytes;

/// A single argument of a [`CommandFrame`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Argument {
    /// Passed to the child process verbatim.
    Literal(String),
    /// Replaced by the path of the staged binary with this name.
    BinaryRef(String),
}

/// Appends `data` to the staged binary `binary_name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkFrame {
    pub binary_name: String,
    pub data: Bytes,
}

/// The command to run once staging is complete. Always the last frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandFrame {
    pub command_windows: String,
    pub command_macos: String,
    pub command_linux: String,
    pub args: Vec<Argument>,
    pub stdin_requested: bool,
}

impl CommandFrame {
    pub fn new(
        command_windows: impl Into<String>,
        command_macos: impl Into<String>,
        command_linux: impl Into<String>,
    ) -> Self {
        Self {
            command_windows: command_windows.into(),
            command_macos: command_macos.into(),
            command_linux: command_linux.into(),
            ..Default::default()
        }
    }

    /// Uses the same executable on every platform.
    pub fn everywhere(command: impl Into<String>) -> Self {
        let command = command.into();
        Self::new(command.clone(), command.clone(), command)
    }

    pub fn literal(mut self, arg: impl Into<String>) -> Self {
        self.args.push(Argument::Literal(arg.into()));
        self
    }

    pub fn binary(mut self, name: impl Into<String>) -> Self {
        self.args.push(Argument::BinaryRef(name.into()));
        self
    }

    /// The executable for `platform`. May be empty.
    pub fn command_for(&self, platform: Platform) -> &str {
        match platform {
            Platform::Windows => &self.command_windows,
            Platform::MacOs => &self.command_macos,
            Platform::Linux => &self.command_linux,
        }
    }
}

/// A frame sent from the client to the daemon.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    Chunk(ChunkFrame),
    Command(CommandFrame),
}

/// A frame sent from the daemon back to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    Stdout(Bytes),
    Stderr(Bytes),
    /// Terminal frame carrying the child's exit code.
    Exit(i32),
}

impl From<Argument> for Arg {
    fn from(arg: Argument) -> Self {
        let kind = match arg {
            Argument::Literal(text) => arg::Kind::Regular(text),
            Argument::BinaryRef(name) => arg::Kind::Binary(name),
        };
        Arg { kind: Some(kind) }
    }
}

impl TryFrom<Arg> for Argument {
    type Error = Error;

    fn try_from(arg: Arg) -> Result<Self> {
        match arg.kind {
            Some(arg::Kind::Regular(text)) => Ok(Argument::Literal(text)),
            Some(arg::Kind::Binary(name)) => Ok(Argument::BinaryRef(name)),
            None => Err(Error::invalid(
                "Either regular or binary must be specified for every argument",
            )),
        }
    }
}

impl From<CommandFrame> for Command {
    fn from(frame: CommandFrame) -> Self {
        Command {
            command_windows: frame.command_windows,
            command_macos: frame.command_macos,
            command_linux: frame.command_linux,
            args: frame.args.into_iter().map(Arg::from).collect(),
            stdin: frame.stdin_requested,
        }
    }
}

impl TryFrom<Command> for CommandFrame {
    type Error = Error;

    fn try_from(command: Command) -> Result<Self> {
        Ok(CommandFrame {
            command_windows: command.command_windows,
            command_macos: command.command_macos,
            command_linux: command.command_linux,
            args: command
                .args
                .into_iter()
                .map(Argument::try_from)
                .collect::<Result<_>>()?,
            stdin_requested: command.stdin,
        })
    }
}

impl From<OutboundFrame> for RunCommandRequest {
    fn from(frame: OutboundFrame) -> Self {
        let frame = match frame {
            OutboundFrame::Chunk(chunk) => run_command_request::Frame::Chunk(BinaryChunk {
                binary_name: chunk.binary_name,
                data: chunk.data.into(),
            }),
            OutboundFrame::Command(command) => run_command_request::Frame::Command(command.into()),
        };
        RunCommandRequest { frame: Some(frame) }
    }
}

impl TryFrom<RunCommandRequest> for OutboundFrame {
    type Error = Error;

    fn try_from(req: RunCommandRequest) -> Result<Self> {
        match req.frame {
            Some(run_command_request::Frame::Chunk(chunk)) => Ok(OutboundFrame::Chunk(ChunkFrame {
                binary_name: chunk.binary_name,
                data: chunk.data.into(),
            })),
            Some(run_command_request::Frame::Command(command)) => {
                Ok(OutboundFrame::Command(command.try_into()?))
            }
            None => Err(Error::invalid("Request frame carries neither chunk nor command")),
        }
    }
}

impl From<InboundFrame> for RunCommandResponse {
    fn from(frame: InboundFrame) -> Self {
        let frame = match frame {
            InboundFrame::Stdout(bytes) => run_command_response::Frame::Stdout(bytes.into()),
            InboundFrame::Stderr(bytes) => run_command_response::Frame::Stderr(bytes.into()),
            InboundFrame::Exit(code) => run_command_response::Frame::ExitCode(code),
        };
        RunCommandResponse { frame: Some(frame) }
    }
}

impl TryFrom<RunCommandResponse> for InboundFrame {
    type Error = Error;

    fn try_from(resp: RunCommandResponse) -> Result<Self> {
        match resp.frame {
            Some(run_command_response::Frame::Stdout(bytes)) => {
                Ok(InboundFrame::Stdout(bytes.into()))
            }
            Some(run_command_response::Frame::Stderr(bytes)) => {
                Ok(InboundFrame::Stderr(bytes.into()))
            }
            Some(run_command_response::Frame::ExitCode(code)) => Ok(InboundFrame::Exit(code)),
            None => Err(Error::invalid("Response frame carries no payload")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_picks_platform_specific_executable() {
        let frame = CommandFrame::new(
            r"C:\Program Files (x86)\TyTools\tycmd.exe",
            "tycmd",
            "/usr/bin/tycmd",
        );
        assert_eq!(
            frame.command_for(Platform::Windows),
            r"C:\Program Files (x86)\TyTools\tycmd.exe"
        );
        assert_eq!(frame.command_for(Platform::MacOs), "tycmd");
        assert_eq!(frame.command_for(Platform::Linux), "/usr/bin/tycmd");
    }

    #[test]
    fn command_frame_survives_the_wire() {
        let frame = CommandFrame::everywhere("tycmd")
            .literal("upload")
            .literal("--nocheck")
            .binary("zephyr_hex");
        let wire = RunCommandRequest::from(OutboundFrame::Command(frame.clone()));
        assert_eq!(
            OutboundFrame::try_from(wire).unwrap(),
            OutboundFrame::Command(frame)
        );
    }

    #[test]
    fn empty_request_is_rejected() {
        let err = OutboundFrame::try_from(RunCommandRequest { frame: None }).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[test]
    fn argument_without_kind_is_rejected() {
        let command = Command {
            command_linux: "echo".into(),
            args: vec![Arg { kind: None }],
            ..Default::default()
        };
        assert!(CommandFrame::try_from(command).is_err());
    }

    #[test]
    fn exit_code_zero_is_a_real_frame() {
        let resp = RunCommandResponse::from(InboundFrame::Exit(0));
        assert_eq!(InboundFrame::try_from(resp).unwrap(), InboundFrame::Exit(0));
        assert!(InboundFrame::try_from(RunCommandResponse { frame: None }).is_err());
    }
}
