use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::auth::CredentialStore;

pub const DEFAULT_API_HOST: &str = "https://pathbird.com";

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Pathbird host (or via PATHBIRD_API_HOST)
    #[arg(
        long,
        env = "PATHBIRD_API_HOST",
        default_value = DEFAULT_API_HOST,
        value_parser = parse_host,
        global = true
    )]
    pub api_host: String,

    /// Override the credential file location (or via PBAUTHOR_AUTH_FILE)
    #[arg(long, env = "PBAUTHOR_AUTH_FILE", hide_env_values = true, global = true)]
    pub auth_file: Option<PathBuf>,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "PBAUTHOR_ENV_FILE", hide_env_values = true, global = true)]
    pub env_file: Option<PathBuf>,
}

impl BaseArgs {
    pub fn credential_store(&self) -> Result<CredentialStore> {
        match &self.auth_file {
            Some(path) => Ok(CredentialStore::at(path)),
            None => CredentialStore::default_location(),
        }
    }
}

fn parse_host(value: &str) -> Result<String, String> {
    let host = value.trim().trim_end_matches('/');
    if !(host.starts_with("http://") || host.starts_with("https://")) {
        return Err(format!("expected an http(s) URL, got {value:?}"));
    }
    Ok(host.to_string())
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}
