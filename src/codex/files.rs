//! Building the upload set from a codex directory.
//!
//! Walks the directory recursively and produces [`FileRef`]s whose logical
//! names are relative paths normalized to forward slashes. Hidden entries
//! (any path segment starting with `.`) are skipped, which also keeps the
//! codex config file out of the upload.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::error::PreconditionError;

/// Extension that marks the primary (notebook) file of a codex.
pub const PRIMARY_EXTENSION: &str = "ipynb";

pub const DEFAULT_MAX_FILES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Path inside the archive, relative to the codex root (`/`-separated).
    pub logical_name: String,
    /// Location on the local filesystem.
    pub source_path: PathBuf,
}

impl FileRef {
    pub fn new(logical_name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            logical_name: logical_name.into(),
            source_path: source_path.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        self.logical_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.logical_name)
    }
}

/// Collects all non-hidden files under `root`, sorted by logical name.
///
/// Symlinks are followed. A link that leads back to one of its own ancestor
/// directories is skipped with a warning.
pub fn collect_files(root: &Path) -> Result<Vec<FileRef>> {
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.loop_ancestor().is_some() => {
                warn!(path = ?err.path(), "skipping symlink loop in codex directory");
                continue;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("unable to build file list for {}", root.display()))
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let rel_path = entry.path().strip_prefix(root).with_context(|| {
            format!("couldn't determine relative path: {}", entry.path().display())
        })?;
        let logical_name = rel_path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push(FileRef::new(logical_name, entry.into_path()));
    }

    files.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));
    debug!(count = files.len(), root = %root.display(), "collected codex files");
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Finds the single primary file of the upload set.
pub fn select_primary(files: &[FileRef]) -> Result<&FileRef, PreconditionError> {
    let matches: Vec<&FileRef> = files.iter().filter(|f| is_primary(f)).collect();
    match matches.as_slice() {
        [] => Err(PreconditionError::NoPrimaryFile {
            ext: PRIMARY_EXTENSION,
        }),
        [primary] => Ok(primary),
        many => Err(PreconditionError::MultiplePrimaryFiles {
            ext: PRIMARY_EXTENSION,
            names: many.iter().map(|f| f.logical_name.clone()).collect(),
        }),
    }
}

fn is_primary(file: &FileRef) -> bool {
    Path::new(file.file_name())
        .extension()
        .is_some_and(|ext| ext == PRIMARY_EXTENSION)
}

pub fn check_file_count(files: &[FileRef], max: usize) -> Result<(), PreconditionError> {
    if files.len() > max {
        return Err(PreconditionError::TooManyFiles {
            count: files.len(),
            max,
        });
    }
    Ok(())
}
