use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use flasherd_core::types::DEFAULT_SERVER_ADDR;
use std::path::PathBuf;

/// How the child's stderr is reported to the client.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// stderr lines are sent as stderr frames.
    #[default]
    Separate,
    /// stderr is sent to the same pipe as stdout, and everything is reported
    /// as stdout frames in the order the child wrote it.
    Merged,
}

/// Runtime configuration for the `flasherd` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for a single
/// developer machine.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "flasherd",
    version,
    about = "Stages binaries and runs commands against them on behalf of remote callers"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(DEFAULT_SERVER_ADDR))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Directory staged binaries are written to.
    ///
    /// Files are named `<request id>_<binary name>` and are never deleted by
    /// the daemon. Request IDs continue from the highest one found here.
    /// Defaults to `flasherd` under the platform's local data directory.
    ///
    /// Environment variable: `STAGING_DIR`
    #[arg(long, env = "STAGING_DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Number of invocations that may run concurrently.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 10)]
    pub num_workers: usize,

    /// Number of accepted invocations that may wait for a free worker.
    ///
    /// Environment variable: `QUEUE_SIZE`
    #[arg(long, env = "QUEUE_SIZE", default_value_t = 64)]
    pub queue_size: usize,

    /// Capacity of the response buffer between an invocation and its gRPC
    /// stream, in frames.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 1024)]
    pub stream_buffer_size: usize,

    /// Whether stderr is kept apart from stdout in the response stream.
    ///
    /// Environment variable: `OUTPUT_MODE`
    #[arg(long, env = "OUTPUT_MODE", value_enum, default_value_t = OutputMode::Separate)]
    pub output_mode: OutputMode,

    /// Maximum number of bytes a single invocation may stage. `0` disables
    /// the limit.
    ///
    /// Environment variable: `MAX_STAGED_BYTES`
    #[arg(long, env = "MAX_STAGED_BYTES", default_value_t = 1 << 30)]
    pub max_staged_bytes: u64,

    /// Seconds to wait for running invocations to finish on shutdown before
    /// their children are killed.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub staging_dir: PathBuf,
    pub num_workers: usize,
    pub queue_size: usize,
    pub stream_buffer_size: usize,
    pub output_mode: OutputMode,
    pub max_staged_bytes: Option<u64>,
    pub shutdown_timeout: u64,
    /// OS identifier commands are resolved for, as in
    /// [`std::env::consts::OS`].
    pub os: String,
}

impl ServerConfig {
    /// A configuration with default limits that stages into `staging_dir`.
    pub fn with_staging_dir(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            uds: false,
            staging_dir: staging_dir.into(),
            num_workers: 10,
            queue_size: 64,
            stream_buffer_size: 1024,
            output_mode: OutputMode::Separate,
            max_staged_bytes: Some(1 << 30),
            shutdown_timeout: 3,
            os: std::env::consts::OS.to_string(),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.queue_size == 0 {
            bail!("QUEUE_SIZE must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        let staging_dir = match args.staging_dir {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .context("Failed to get data local dir, pass --staging-dir")?
                .join("flasherd"),
        };

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            staging_dir,
            num_workers: args.num_workers,
            queue_size: args.queue_size,
            stream_buffer_size: args.stream_buffer_size,
            output_mode: args.output_mode,
            max_staged_bytes: (args.max_staged_bytes > 0).then_some(args.max_staged_bytes),
            shutdown_timeout: args.shutdown_timeout,
            os: std::env::consts::OS.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("flasherd").chain(args.iter().copied()))?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults_without_flags() {
        let config = parse(&["--staging-dir", "/tmp/flasherd-test"]).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:6767");
        assert_eq!(config.num_workers, 10);
        assert_eq!(config.output_mode, OutputMode::Separate);
        assert_eq!(config.max_staged_bytes, Some(1 << 30));
        assert_eq!(config.staging_dir, PathBuf::from("/tmp/flasherd-test"));
    }

    #[test]
    fn zero_disables_the_staging_limit() {
        let config = parse(&["--staging-dir", "/tmp/x", "--max-staged-bytes", "0"]).unwrap();
        assert_eq!(config.max_staged_bytes, None);
    }

    #[test]
    fn merged_output_is_selectable() {
        let config = parse(&["--staging-dir", "/tmp/x", "--output-mode", "merged"]).unwrap();
        assert_eq!(config.output_mode, OutputMode::Merged);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = parse(&["--staging-dir", "/tmp/x", "--num-workers", "0"]).unwrap_err();
        assert!(err.to_string().contains("NUM_WORKERS"));
    }
}
