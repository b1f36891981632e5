use std::fs;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::args::BaseArgs;
use crate::auth::require_credential;
use crate::config::CodexConfig;
use crate::graphql::GraphQlClient;
use crate::ui::{print_command_status, select_category, select_course_interactive, CommandStatus};

use super::InitArgs;

pub async fn run(base: &BaseArgs, args: InitArgs) -> Result<()> {
    if !args.path.is_dir() {
        bail!("{} is not a directory", args.path.display());
    }
    let dir = fs::canonicalize(&args.path)
        .with_context(|| format!("could not resolve {}", args.path.display()))?;

    let credential = require_credential(base)?;
    let client = GraphQlClient::new(&base.api_host, Some(credential))?;

    let mut config = CodexConfig::load(&dir)?.unwrap_or_default();

    let course = select_course_interactive(&client).await?;
    let category = select_category(&course)?;
    debug!(course = %course.id, category = %category.id, "selected codex category");
    config.upload.codex_category = category.id;

    if let Some(name) = args.name {
        config.upload.name = Some(name);
    }
    if !args.system_packages.is_empty() {
        config.kernel.system_packages = args.system_packages;
    }

    let path = config.save(&dir)?;
    print_command_status(
        CommandStatus::Success,
        &format!(
            "Wrote {} (course: {}, category: {})",
            path.display(),
            course.name,
            category.name
        ),
    );
    Ok(())
}
