//! Per-codex configuration stored as `.pbauthor.toml` in the codex directory.
//!
//! ```toml
//! [upload]
//! codex_category = "cat-1"
//! name = "Intro to Foo-ology"
//! ```

use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ui::{print_command_status, CommandStatus};

pub const CONFIG_FILE_NAME: &str = ".pbauthor.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CodexConfig {
    pub upload: UploadConfig,
    pub kernel: KernelConfig,
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub codex_category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Set after the first successful upload; later uploads replace this codex.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codex_id: Option<String>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_packages: Vec<String>,
    #[serde(flatten)]
    pub extra: toml::Table,
}

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE_NAME)
}

impl CodexConfig {
    /// Reads the config of the codex in `dir`. A missing file is `None`; a
    /// file that cannot be parsed is an error.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = config_path(dir);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("could not read {}", path.display())),
        };

        let config: CodexConfig = toml::from_str(&contents)
            .with_context(|| format!("invalid codex config {}", path.display()))?;
        for key in config.unknown_keys() {
            print_command_status(
                CommandStatus::Warning,
                &format!("Warning: unknown config key {} in {}", key, path.display()),
            );
        }
        debug!(path = %path.display(), "loaded codex config");
        Ok(Some(config))
    }

    /// Writes the config atomically (temp file + rename).
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = config_path(dir);
        let text = toml::to_string_pretty(self).context("failed to encode codex config")?;
        let temp_path = path.with_extension("toml.tmp");
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("could not create {}", temp_path.display()))?;
        file.write_all(text.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)
            .with_context(|| format!("could not write {}", path.display()))?;
        debug!(path = %path.display(), "saved codex config");
        Ok(path)
    }

    fn unknown_keys(&self) -> Vec<String> {
        let top = self.extra.keys().cloned();
        let upload = self.upload.extra.keys().map(|k| format!("upload.{k}"));
        let kernel = self.kernel.extra.keys().map(|k| format!("kernel.{k}"));
        top.chain(upload).chain(kernel).collect()
    }
}
