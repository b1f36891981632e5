//! Errors raised by codex commands before or instead of a successful upload.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PreconditionError {
    #[error("no codex file found (expected one .{ext} file)")]
    NoPrimaryFile { ext: &'static str },

    #[error("expected at most one .{ext} file, found: {}", .names.join(", "))]
    MultiplePrimaryFiles {
        ext: &'static str,
        names: Vec<String>,
    },

    #[error("codex directory contains {count} files (at most {max} are allowed)")]
    TooManyFiles { count: usize, max: usize },

    #[error("no codex config found in {} (run `pbauthor codex init` first)", .dir.display())]
    MissingConfig { dir: PathBuf },

    #[error("not authenticated (run `pbauthor auth login` first)")]
    NotAuthenticated,
}

/// The server rejected the codex; the issues have already been printed.
#[derive(Debug, thiserror::Error)]
#[error("codex failed validation ({count} issue(s) reported)")]
pub struct IssuesReported {
    pub count: usize,
}
