use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use crate::args::BaseArgs;

pub mod api;
pub mod build;
pub mod error;
pub mod files;
mod init;
mod upload;

#[derive(Debug, Clone, Args)]
pub struct CodexArgs {
    #[command(subcommand)]
    command: CodexCommands,
}

#[derive(Debug, Clone, Subcommand)]
enum CodexCommands {
    /// Create the codex config file for a directory
    Init(InitArgs),
    /// Upload a codex and wait for its kernel image to build
    Upload(UploadArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InitArgs {
    /// Codex directory
    #[arg(value_name = "DIR", default_value = ".")]
    path: PathBuf,

    /// Display name of the codex
    #[arg(long)]
    name: Option<String>,

    /// System (apt) packages to install in the kernel image
    #[arg(long = "system-packages", value_name = "PACKAGE", num_args = 1..)]
    system_packages: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct UploadArgs {
    /// Codex directory
    #[arg(value_name = "DIR")]
    path: PathBuf,

    /// Don't ask for confirmation
    #[arg(short = 'y', long)]
    yes: bool,

    /// Don't wait for the kernel build to complete
    #[arg(long)]
    no_wait: bool,

    /// Maximum number of files a codex may contain
    #[arg(long, default_value_t = files::DEFAULT_MAX_FILES)]
    max_files: usize,

    /// Seconds to wait for the kernel build
    #[arg(long, value_name = "SECONDS", default_value_t = build::DEFAULT_BUILD_TIMEOUT.as_secs())]
    timeout: u64,
}

pub async fn run(base: BaseArgs, args: CodexArgs) -> Result<()> {
    match args.command {
        CodexCommands::Init(args) => init::run(&base, args).await,
        CodexCommands::Upload(args) => upload::run(&base, args).await,
    }
}
