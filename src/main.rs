use std::ffi::OsString;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod archive;
mod args;
mod auth;
mod codex;
mod conduit;
mod config;
mod env;
mod graphql;
mod http;
mod multipart;
#[cfg(test)]
mod test_support;
mod ui;

use crate::args::{BaseArgs, CLIArgs};
use crate::codex::build::WaitError;
use crate::codex::error::IssuesReported;

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
const CLI_VERSION: &str = match option_env!("PBAUTHOR_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

const LOG_ENV_VAR: &str = "PBAUTHOR_LOG";

#[derive(Debug, Parser)]
#[command(name = "pbauthor", about = "Pathbird author CLI", version = CLI_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in, check or clear your Pathbird credentials
    Auth(CLIArgs<auth::AuthArgs>),
    /// Set up and upload codices
    Codex(CLIArgs<codex::CodexArgs>),
}

impl Commands {
    fn base(&self) -> &BaseArgs {
        match self {
            Commands::Auth(cmd) => &cmd.base,
            Commands::Codex(cmd) => &cmd.base,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info,pbauthor=debug" } else { "info" };
    let directives = std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| default.to_string());
    let filter = EnvFilter::from_str(&directives).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

/// 2: the server rejected the codex, 3: the kernel build failed,
/// 4: waiting was interrupted or timed out, 1: anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<IssuesReported>().is_some() {
        return 2;
    }
    match err.downcast_ref::<WaitError>() {
        Some(WaitError::BuildFailed(_)) => 3,
        Some(WaitError::Cancelled | WaitError::TimedOut(_)) => 4,
        _ => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<OsString> = std::env::args_os().collect();
    if let Err(err) = env::bootstrap_from_args(&argv) {
        eprintln!("error: {err:#}");
        return ExitCode::FAILURE;
    }
    let cli = Cli::parse_from(argv);
    let verbose = cli.command.base().verbose;
    init_tracing(verbose);

    let result = match cli.command {
        Commands::Auth(cmd) => auth::run(cmd.base, cmd.args).await,
        Commands::Codex(cmd) => codex::run(cmd.base, cmd.args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if verbose {
                eprintln!("error: {err:?}");
            } else {
                eprintln!("error: {err:#}");
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codex::build::BuildState;
    use crate::codex::error::PreconditionError;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes() {
        let issues: anyhow::Error = IssuesReported { count: 2 }.into();
        assert_eq!(exit_code(&issues), 2);

        let failed: anyhow::Error = WaitError::BuildFailed(BuildState::Failed).into();
        assert_eq!(exit_code(&failed), 3);

        let timed_out: anyhow::Error =
            WaitError::TimedOut(std::time::Duration::from_secs(1)).into();
        assert_eq!(exit_code(&timed_out), 4);
        assert_eq!(exit_code(&WaitError::Cancelled.into()), 4);

        let other: anyhow::Error = PreconditionError::NotAuthenticated.into();
        assert_eq!(exit_code(&other), 1);
    }

    #[test]
    fn context_keeps_exit_code() {
        let err = anyhow::Error::from(WaitError::Cancelled).context("while uploading");
        assert_eq!(exit_code(&err), 4);
    }

    #[test]
    fn upload_flags_parse() {
        let cli = Cli::try_parse_from([
            "pbauthor",
            "codex",
            "upload",
            "lesson",
            "--yes",
            "--no-wait",
            "--max-files",
            "40",
            "--api-host",
            "http://localhost:8080/",
        ])
        .unwrap();
        assert_eq!(cli.command.base().api_host, "http://localhost:8080");
    }
}
