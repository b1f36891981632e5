use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use dialoguer::Confirm;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::args::BaseArgs;
use crate::auth::require_credential;
use crate::config::CodexConfig;
use crate::graphql::GraphQlClient;
use crate::http::ApiClient;
use crate::ui::{print_command_status, print_issues, with_spinner, CommandStatus};

use super::api::{upload_codex, KernelOptions, UploadOutcome, UploadRequest};
use super::build::{BuildWatcher, LogSink, WaitError};
use super::error::{IssuesReported, PreconditionError};
use super::files::{check_file_count, collect_files, select_primary};
use super::UploadArgs;

pub async fn run(base: &BaseArgs, args: UploadArgs) -> Result<()> {
    if !args.path.is_dir() {
        bail!("{} is not a directory", args.path.display());
    }
    let dir = fs::canonicalize(&args.path)
        .with_context(|| format!("could not resolve {}", args.path.display()))?;

    let mut config = match CodexConfig::load(&dir)? {
        Some(config) if !config.upload.codex_category.is_empty() => config,
        _ => return Err(PreconditionError::MissingConfig { dir }.into()),
    };

    let files = collect_files(&dir)?;
    check_file_count(&files, args.max_files)?;
    let primary = select_primary(&files)?.logical_name.clone();

    let credential = require_credential(base)?;

    if !args.yes && !confirm_upload(&dir, &primary, files.len())? {
        bail!("upload aborted");
    }

    let request = UploadRequest {
        codex_category_id: config.upload.codex_category.clone(),
        replace_id: config.upload.codex_id.clone(),
        name: config.upload.name.clone(),
        kernel_options: KernelOptions {
            system_packages: config.kernel.system_packages.clone(),
        },
        files,
    };
    let client = ApiClient::new(&base.api_host, Some(credential))?;

    let outcome = with_spinner("Uploading codex...", upload_codex(&client, &request)).await?;
    let codex_id = match outcome {
        UploadOutcome::Uploaded { codex_id } => codex_id,
        UploadOutcome::Rejected { issues } => {
            print_command_status(CommandStatus::Error, "Failed to parse codex:");
            print_issues(&issues);
            return Err(IssuesReported {
                count: issues.len(),
            }
            .into());
        }
    };
    debug!(%codex_id, "codex uploaded");

    if config.upload.codex_id.as_deref() != Some(codex_id.as_str()) {
        config.upload.codex_id = Some(codex_id.clone());
        config
            .save(&dir)
            .context("codex upload succeeded, but failed to save codex config file")?;
    }

    let details_url = format!("{}/codex/{}/details", base.api_host, codex_id);
    if args.no_wait {
        info!("not waiting for kernel build to complete (--no-wait was set)");
    } else {
        let graphql = GraphQlClient::from_api(&client);
        wait_for_build(&graphql, &codex_id, Duration::from_secs(args.timeout), &details_url).await?;
    }

    print_command_status(
        CommandStatus::Success,
        &format!("Successfully uploaded codex: {details_url}"),
    );
    Ok(())
}

fn confirm_upload(dir: &Path, primary: &str, file_count: usize) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        bail!("refusing to upload without confirmation in non-interactive mode (pass --yes)");
    }
    let confirmed = Confirm::new()
        .with_prompt(format!(
            "Upload codex {} ({primary} + {} other file(s))?",
            dir.display(),
            file_count.saturating_sub(1)
        ))
        .default(true)
        .interact()?;
    Ok(confirmed)
}

async fn wait_for_build(
    client: &GraphQlClient,
    codex_id: &str,
    timeout: Duration,
    details_url: &str,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let start = Instant::now();
    let mut sink = LogSink::stdout();
    let result = BuildWatcher::new(client, codex_id)
        .wait(&mut sink, &cancel, timeout)
        .await;
    interrupt.abort();

    match result {
        Ok(build) => {
            debug!(events = ?build.events, "kernel build events");
            if !build.cached {
                info!(
                    "waited {:.0?} for kernel build process ({} log lines)",
                    start.elapsed(),
                    build.log_lines
                );
            }
            Ok(())
        }
        Err(WaitError::BuildFailed(state)) => {
            print_command_status(
                CommandStatus::Error,
                &format!("Failed to build kernel (got status: {state}): {details_url}"),
            );
            Err(WaitError::BuildFailed(state).into())
        }
        Err(err) => {
            error!("something went wrong while checking the kernel build status of {codex_id}");
            Err(err.into())
        }
    }
}
