//! Tar encoding of the non-primary files of a codex upload.
//!
//! Entries are written in logical-name order so the same directory always
//! produces the same stream. Each entry carries a PAX `mtime` record with
//! nanosecond precision ahead of its ustar header; plain ustar truncates
//! timestamps to whole seconds.

use std::fs::{File, Metadata};
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use tar::{Builder, EntryType, Header};
use tracing::debug;

use crate::codex::files::FileRef;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("adding {name} to codex tar archive")]
    Entry {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to finish codex tar archive")]
    Finish(#[source] io::Error),
}

/// Writes every file except `exclude` into `out` as a tar stream and returns
/// the writer once the end-of-archive marker has been written.
pub fn write_archive<W: Write>(
    out: W,
    files: &[FileRef],
    exclude: &FileRef,
) -> Result<W, ArchiveError> {
    let mut entries: Vec<&FileRef> = files
        .iter()
        .filter(|f| f.logical_name != exclude.logical_name)
        .collect();
    entries.sort_by(|a, b| a.logical_name.cmp(&b.logical_name));

    let total = entries.len();
    debug!(count = total, "writing codex tar archive");

    let mut builder = Builder::new(out);
    for (i, file) in entries.into_iter().enumerate() {
        debug!(name = %file.logical_name, "adding file {} of {}", i + 1, total);
        append_file(&mut builder, file).map_err(|source| ArchiveError::Entry {
            name: file.logical_name.clone(),
            source,
        })?;
    }

    builder.into_inner().map_err(ArchiveError::Finish)
}

fn append_file<W: Write>(builder: &mut Builder<W>, file: &FileRef) -> io::Result<()> {
    let fd = File::open(&file.source_path)?;
    let metadata = fd.metadata()?;
    let modified = metadata.modified().unwrap_or(UNIX_EPOCH);

    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::Regular);
    header.set_size(metadata.len());
    header.set_mode(mode_bits(&metadata));
    header.set_mtime(
        modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    );

    if let Some(mtime) = pax_mtime(modified) {
        builder.append_pax_extensions([("mtime", mtime.as_bytes())])?;
    }
    builder.append_data(&mut header, &file.logical_name, fd)?;
    debug!(name = %file.logical_name, bytes = metadata.len(), "wrote archive entry");
    Ok(())
}

#[cfg(unix)]
fn mode_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(metadata: &Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Seconds and nanoseconds since the epoch, as stored in a PAX `mtime` record.
fn pax_mtime(time: SystemTime) -> Option<String> {
    let d = time.duration_since(UNIX_EPOCH).ok()?;
    Some(format!("{}.{:09}", d.as_secs(), d.subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Read;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;

    fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> FileRef {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        FileRef::new(name, path)
    }

    struct ReadBack {
        name: String,
        contents: Vec<u8>,
        mtime: u64,
        mode: u32,
        pax_mtime: Option<String>,
    }

    fn read_back(bytes: &[u8]) -> Vec<ReadBack> {
        let mut archive = tar::Archive::new(bytes);
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mtime = entry.header().mtime().unwrap();
            let mode = entry.header().mode().unwrap();
            let pax_mtime = entry.pax_extensions().unwrap().and_then(|exts| {
                exts.filter_map(Result::ok)
                    .find(|ext| ext.key() == Ok("mtime"))
                    .and_then(|ext| ext.value().ok().map(str::to_string))
            });
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            out.push(ReadBack {
                name,
                contents,
                mtime,
                mode,
                pax_mtime,
            });
        }
        out
    }

    #[test]
    fn archive_excludes_primary_and_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            write_file(&dir, "zeta.txt", b"last"),
            write_file(&dir, "data/table.csv", b"a,b\n1,2\n"),
            write_file(&dir, "main.ipynb", b"{\"cells\":[]}"),
            write_file(&dir, "alpha.bin", &[0u8, 1, 2, 255]),
        ];
        let primary = files[2].clone();

        let bytes = write_archive(Vec::new(), &files, &primary).unwrap();
        let entries = read_back(&bytes);

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha.bin", "data/table.csv", "zeta.txt"]);
        assert_eq!(entries[0].contents, vec![0u8, 1, 2, 255]);
        assert_eq!(entries[1].contents, b"a,b\n1,2\n");
        assert_eq!(entries[2].contents, b"last");
    }

    #[test]
    fn archive_keeps_subsecond_mtime() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "notes.md", b"# notes");
        let primary = write_file(&dir, "main.ipynb", b"{}");

        let stamp = UNIX_EPOCH + Duration::new(1_600_000_000, 123_456_789);
        fs::File::options()
            .write(true)
            .open(&file.source_path)
            .unwrap()
            .set_modified(stamp)
            .unwrap();

        let bytes = write_archive(Vec::new(), &[file, primary.clone()], &primary).unwrap();
        let entries = read_back(&bytes);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mtime, 1_600_000_000);
        assert_eq!(
            entries[0].pax_mtime.as_deref(),
            Some("1600000000.123456789")
        );
        assert_eq!(pax_mtime(stamp).as_deref(), Some("1600000000.123456789"));
    }

    #[cfg(unix)]
    #[test]
    fn archive_keeps_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = write_file(&dir, "run.sh", b"#!/bin/sh\n");
        fs::set_permissions(&script.source_path, fs::Permissions::from_mode(0o750)).unwrap();
        let primary = write_file(&dir, "main.ipynb", b"{}");

        let bytes = write_archive(Vec::new(), &[script, primary.clone()], &primary).unwrap();
        let entries = read_back(&bytes);
        assert_eq!(entries[0].mode, 0o750);
    }

    #[test]
    fn missing_source_aborts_archive() {
        let dir = TempDir::new().unwrap();
        let primary = write_file(&dir, "main.ipynb", b"{}");
        let ghost = FileRef::new("ghost.txt", dir.path().join("ghost.txt"));

        let err = write_archive(Vec::new(), &[ghost, primary.clone()], &primary).unwrap_err();
        match err {
            ArchiveError::Entry { name, source } => {
                assert_eq!(name, "ghost.txt");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn only_primary_yields_empty_archive() {
        let dir = TempDir::new().unwrap();
        let primary = write_file(&dir, "main.ipynb", b"{}");
        let bytes = write_archive(Vec::new(), &[primary.clone()], &primary).unwrap();
        assert!(read_back(&bytes).is_empty());
        assert_eq!(bytes.len(), 1024);
    }
}
