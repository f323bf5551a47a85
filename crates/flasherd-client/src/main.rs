use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use flasherd_client::{ClientError, FlasherdClient, Outcome, stream::Binary};
use flasherd_core::{
    frame::{Argument, CommandFrame},
    types::DEFAULT_ENDPOINT,
};
use tracing_subscriber::EnvFilter;

/// Stage binaries on a flasherd daemon and run a command against them.
#[derive(Parser, Debug)]
#[command(
    name = "flasher",
    version,
    after_help = "Exit status: the remote command's exit code, 69 if the daemon cannot be \
                  reached, 70 if the call failed before the command exited, 76 if no exit \
                  code was received."
)]
struct Cli {
    /// Address of the daemon.
    ///
    /// Environment variable: `FLASHERD_ENDPOINT`
    #[arg(long, env = "FLASHERD_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Log filter for messages written to stderr (e.g. `debug`).
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Stage binaries and run a command, streaming its output.
    Run(RunArgs),
    /// Check that the daemon is up and can run commands.
    Check,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Binary to stage, as `NAME=PATH`. Refer to it in arguments as `@NAME`.
    #[arg(long = "binary", value_name = "NAME=PATH", value_parser = parse_binary)]
    binaries: Vec<Binary>,

    /// Command to run when the daemon is on Windows.
    #[arg(long)]
    windows: Option<String>,

    /// Command to run when the daemon is on macOS.
    #[arg(long)]
    macos: Option<String>,

    /// Command to run when the daemon is on Linux.
    #[arg(long)]
    linux: Option<String>,

    /// Command for every platform without a specific one.
    #[arg(long)]
    command: Option<String>,

    /// Ask for stdin to be forwarded. The daemon refuses such calls.
    #[arg(long)]
    stdin: bool,

    /// Arguments. `@name` is replaced by the staged path of binary `name`;
    /// `@@text` passes `@text` through.
    #[arg(last = true)]
    args: Vec<String>,
}

impl RunArgs {
    fn command_frame(&self) -> anyhow::Result<CommandFrame> {
        let pick = |specific: &Option<String>| {
            specific
                .clone()
                .or_else(|| self.command.clone())
                .unwrap_or_default()
        };
        let mut frame = CommandFrame::new(pick(&self.windows), pick(&self.macos), pick(&self.linux));
        if frame.command_windows.is_empty()
            && frame.command_macos.is_empty()
            && frame.command_linux.is_empty()
        {
            bail!("no command given; pass --command or a per-platform command");
        }
        frame.args = self.args.iter().map(|a| parse_argument(a)).collect();
        frame.stdin_requested = self.stdin;
        Ok(frame)
    }
}

fn parse_binary(raw: &str) -> Result<Binary, String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got `{raw}`"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got `{raw}`"));
    }
    Ok(Binary::new(name, path))
}

fn parse_argument(raw: &str) -> Argument {
    if let Some(escaped) = raw.strip_prefix("@@") {
        Argument::Literal(format!("@{escaped}"))
    } else if let Some(name) = raw.strip_prefix('@') {
        Argument::BinaryRef(name.to_string())
    } else {
        Argument::Literal(raw.to_string())
    }
}

/// The daemon could not be reached (`EX_UNAVAILABLE`).
const EXIT_UNAVAILABLE: i32 = 69;
/// The call failed before the command produced an exit code (`EX_SOFTWARE`).
const EXIT_FAILURE: i32 = 70;
/// The response stream ended without an exit code (`EX_PROTOCOL`).
const EXIT_NO_EXIT_CODE: i32 = 76;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = run(&cli).await;
    let (code, diagnostic) = exit_status(&result, &cli.endpoint);
    if let Some(line) = diagnostic {
        eprintln!("{line}");
    }
    std::process::exit(code);
}

/// Process exit code for a finished call, and the line to print on stderr
/// if it did not end with a remote exit code.
fn exit_status(result: &anyhow::Result<Outcome>, endpoint: &str) -> (i32, Option<String>) {
    match result {
        Ok(Outcome::Exited(code)) => (*code, None),
        Ok(Outcome::NoExit) => (
            EXIT_NO_EXIT_CODE,
            Some("flasher: no exit code received".to_string()),
        ),
        Err(e) => match e.downcast_ref::<ClientError>() {
            Some(err) if err.is_unreachable() => (
                EXIT_UNAVAILABLE,
                Some(format!("flasher: {err} at {endpoint}")),
            ),
            _ => (EXIT_FAILURE, Some(format!("flasher: {e:#}"))),
        },
    }
}

async fn run(cli: &Cli) -> anyhow::Result<Outcome> {
    let mut client = FlasherdClient::connect(cli.endpoint.clone()).await?;

    match &cli.command {
        Cmd::Run(args) => {
            let command = args.command_frame()?;
            let outcome = client
                .run(
                    &args.binaries,
                    command,
                    &mut tokio::io::stdout(),
                    &mut tokio::io::stderr(),
                )
                .await?;
            Ok(outcome)
        }
        Cmd::Check => {
            let outcome = client
                .health_check()
                .await
                .context("health check command failed")?;
            if outcome.success() {
                println!("flasherd is running at {}", client.endpoint());
            }
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_prefix_marks_binary_refs() {
        assert_eq!(parse_argument("@zephyr_hex"), Argument::BinaryRef("zephyr_hex".into()));
        assert_eq!(parse_argument("@@home"), Argument::Literal("@home".into()));
        assert_eq!(parse_argument("upload"), Argument::Literal("upload".into()));
        assert_eq!(parse_argument("a@b"), Argument::Literal("a@b".into()));
    }

    #[test]
    fn binary_spec_splits_on_first_equals() {
        assert_eq!(
            parse_binary("fw=build/a=b.hex").unwrap(),
            Binary::new("fw", "build/a=b.hex")
        );
        assert!(parse_binary("fw").is_err());
        assert!(parse_binary("=x").is_err());
    }

    #[test]
    fn per_platform_commands_fall_back_to_command() {
        let cli = Cli::parse_from([
            "flasher",
            "run",
            "--binary",
            "zephyr_hex=fw.hex",
            "--windows",
            r"C:\tycmd.exe",
            "--command",
            "tycmd",
            "--",
            "upload",
            "@zephyr_hex",
        ]);
        let Cmd::Run(args) = cli.command else {
            panic!("expected run");
        };
        let frame = args.command_frame().unwrap();
        assert_eq!(frame.command_windows, r"C:\tycmd.exe");
        assert_eq!(frame.command_macos, "tycmd");
        assert_eq!(frame.command_linux, "tycmd");
        assert_eq!(
            frame.args,
            [
                Argument::Literal("upload".into()),
                Argument::BinaryRef("zephyr_hex".into())
            ]
        );
        assert_eq!(args.binaries, [Binary::new("zephyr_hex", "fw.hex")]);
    }

    #[test]
    fn run_without_any_command_is_rejected() {
        let cli = Cli::parse_from(["flasher", "run", "--", "x"]);
        let Cmd::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.command_frame().is_err());
    }

    #[test]
    fn remote_codes_pass_through_unchanged() {
        for code in [0, 1, 2, 127] {
            assert_eq!(exit_status(&Ok(Outcome::Exited(code)), "x"), (code, None));
        }
    }

    #[test]
    fn missing_exit_code_is_reported() {
        let (code, line) = exit_status(&Ok(Outcome::NoExit), "x");
        assert_eq!(code, EXIT_NO_EXIT_CODE);
        assert_eq!(line.as_deref(), Some("flasher: no exit code received"));
    }

    #[test]
    fn daemon_failures_are_not_unavailable() {
        let err = anyhow::Error::from(ClientError::from(tonic::Status::failed_precondition(
            "Failed to spawn `tycmd`",
        )));
        let (code, line) = exit_status(&Err(err), "x");
        assert_eq!(code, EXIT_FAILURE);
        assert!(line.unwrap().contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn unreachable_daemon_prints_one_terse_line() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let cli = Cli::parse_from(["flasher", "--endpoint", &endpoint, "check"]);
        let result = run(&cli).await;
        let (code, line) = exit_status(&result, &cli.endpoint);

        assert_eq!(code, EXIT_UNAVAILABLE);
        assert_eq!(
            line.unwrap(),
            format!("flasher: flasherd might not be running at {endpoint}")
        );
    }
}
