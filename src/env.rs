use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const ENV_FILE_VAR: &str = "PBAUTHOR_ENV_FILE";
const DEFAULT_ENV_FILES: [&str; 2] = [".env", ".env.local"];

/// Loads `.env` files before clap runs so their values can feed `env = ...`
/// arguments such as `PATHBIRD_API_HOST`.
pub fn bootstrap_from_args(args: &[OsString]) -> Result<()> {
    let explicit = env_file_arg(args).or_else(|| std::env::var_os(ENV_FILE_VAR).map(PathBuf::from));
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    for (key, value) in read_env_files(&cwd, explicit.as_deref())? {
        std::env::set_var(key, value);
    }
    Ok(())
}

/// Values from the env files that are not already set in the process
/// environment. An explicit file must exist; the default files are optional
/// and `.env.local` wins over `.env`.
fn read_env_files(cwd: &Path, explicit: Option<&Path>) -> Result<BTreeMap<String, String>> {
    let candidates: Vec<PathBuf> = match explicit {
        Some(path) => vec![cwd.join(path)],
        None => DEFAULT_ENV_FILES
            .iter()
            .map(|name| cwd.join(name))
            .filter(|path| path.is_file())
            .collect(),
    };

    let mut loaded = BTreeMap::new();
    for path in candidates {
        let entries = dotenvy::from_path_iter(&path)
            .with_context(|| format!("failed to read env file {}", path.display()))?;
        for entry in entries {
            let (key, value) =
                entry.with_context(|| format!("failed to parse env file {}", path.display()))?;
            if std::env::var_os(&key).is_none() {
                loaded.insert(key, value);
            }
        }
    }
    Ok(loaded)
}

/// Finds `--env-file <path>` or `--env-file=<path>` anywhere before `--`.
fn env_file_arg(args: &[OsString]) -> Option<PathBuf> {
    let mut found = None;
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.to_str() {
            Some("--") => break,
            Some("--env-file") => found = iter.next().map(PathBuf::from),
            Some(other) => {
                if let Some(value) = other.strip_prefix("--env-file=") {
                    found = Some(PathBuf::from(value));
                }
            }
            None => {}
        }
    }
    found
}
