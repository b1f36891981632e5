//! The `author/upload-codex` endpoint.
//!
//! The request body is a multipart form with three parts, in order:
//! `request` (JSON metadata), `codex` (the primary notebook) and `body`
//! (a tar of every other file). It is produced on a blocking worker and
//! streamed to the server through a bounded [`conduit`], so memory use does
//! not depend on the size of the codex.

use std::fs::File;
use std::io::{self, BufWriter, Write};

use anyhow::{Context, Result};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::files::{select_primary, FileRef};
use crate::archive::write_archive;
use crate::conduit::{conduit, ConduitWriter, DEFAULT_CAPACITY};
use crate::http::{ApiClient, ApiError, ApiResponse};
use crate::multipart::{random_boundary, MultipartWriter};

pub const UPLOAD_ROUTE: &str = "author/upload-codex";
pub const UPLOAD_CONTENT_TYPE: &str = "application/x-pb-multipart-request";

/// Error codes whose `details` carry a list of [`Issue`]s.
const PARSE_FAILED_ERRORS: &[&str] = &["MySTParseFailedErr", "CodexASTParseFailedErr"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub system_packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub codex_category_id: String,
    #[serde(rename = "replaceCodexId", skip_serializing_if = "Option::is_none")]
    pub replace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kernel_options: KernelOptions,
    #[serde(skip)]
    pub files: Vec<FileRef>,
}

/// A validation problem reported by the server for a rejected codex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub kind: String,
    pub message: String,
    pub source_position: Option<String>,
    pub context_lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { codex_id: String },
    Rejected { issues: Vec<Issue> },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    #[serde(default)]
    codex_id: String,
}

#[derive(Deserialize)]
struct ParseFailedDetails {
    #[serde(default)]
    errors: Vec<RawIssue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawIssue {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    source_position: Option<String>,
    #[serde(default)]
    source_info: Option<SourceInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceInfo {
    #[serde(default)]
    source_context: Option<SourceContext>,
}

#[derive(Deserialize)]
struct SourceContext {
    #[serde(default)]
    lines: Vec<String>,
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        Issue {
            kind: raw.error,
            message: raw.message,
            source_position: raw.source_position.filter(|p| !p.is_empty()),
            context_lines: raw
                .source_info
                .and_then(|info| info.source_context)
                .map(|ctx| ctx.lines)
                .unwrap_or_default(),
        }
    }
}

/// Turns an upload response into an outcome. Parse failures are an outcome,
/// not an error: the caller is expected to show the issues.
pub fn classify_upload_response(response: &ApiResponse) -> Result<UploadOutcome, ApiError> {
    if response.is_success() {
        let body: UploadResponse = response.json()?;
        if body.codex_id.is_empty() {
            return Err(response.malformed("upload response did not include a codex id"));
        }
        return Ok(UploadOutcome::Uploaded {
            codex_id: body.codex_id,
        });
    }

    let error = response.error_body()?;
    if PARSE_FAILED_ERRORS.contains(&error.error.as_str()) {
        let details: ParseFailedDetails = serde_json::from_value(error.details)
            .map_err(|err| response.malformed(format!("invalid codex parse error details: {err}")))?;
        return Ok(UploadOutcome::Rejected {
            issues: details.errors.into_iter().map(Issue::from).collect(),
        });
    }
    Err(error.into_api_error(response.status))
}

/// Writes the complete multipart body for `request` into `out`.
pub fn encode_upload_body<W: Write>(
    out: &mut W,
    boundary: &str,
    request: &UploadRequest,
    primary: &FileRef,
) -> Result<()> {
    let mut form = MultipartWriter::with_boundary(out, boundary);

    let part = form.file_part("request", "request.json")?;
    serde_json::to_writer(&mut *part, request).context("failed to encode upload request")?;

    let part = form.file_part("codex", &primary.logical_name)?;
    let mut source = File::open(&primary.source_path)
        .with_context(|| format!("failed to open codex file {}", primary.source_path.display()))?;
    io::copy(&mut source, part)
        .with_context(|| format!("failed to read codex file {}", primary.source_path.display()))?;

    let part = form.file_part("body", "body.tar")?;
    write_archive(part, &request.files, primary).context("failed to write codex files")?;

    form.finish()?;
    Ok(())
}

fn spawn_encoder(
    writer: ConduitWriter,
    boundary: String,
    request: UploadRequest,
    primary: FileRef,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        // Each conduit write waits for the reader, so hand it whole buffers.
        let mut out = BufWriter::with_capacity(DEFAULT_CAPACITY, writer);
        let result = encode_upload_body(&mut out, &boundary, &request, &primary)
            .and_then(|()| out.flush().context("failed to flush upload body"));
        let (writer, _) = out.into_parts();

        match result {
            Ok(()) => {
                debug!("wrote all request files for codex upload");
                writer.close();
            }
            Err(err) => {
                // The HTTP error the consumer sees is the one reported; this
                // is only diagnostic.
                debug!("failed to write request for codex upload: {err:#}");
                writer.abort(format!("{err:#}"));
            }
        }
    })
}

/// Streams the codex to the server and classifies the response.
///
/// Fails with a [`PreconditionError`](super::error::PreconditionError) before
/// any network I/O if the upload set does not contain exactly one notebook.
pub async fn upload_codex(client: &ApiClient, request: &UploadRequest) -> Result<UploadOutcome> {
    let primary = select_primary(&request.files)?.clone();
    debug!(primary = %primary.logical_name, files = request.files.len(), "uploading codex");

    let (writer, reader) = conduit(DEFAULT_CAPACITY);
    let closer = reader.closer();
    let boundary = random_boundary();
    let content_type = format!("{UPLOAD_CONTENT_TYPE}; boundary={boundary}");

    let encoder = spawn_encoder(writer, boundary, request.clone(), primary);
    let body = Body::wrap_stream(ReaderStream::new(reader));

    let sent = client.post_body(UPLOAD_ROUTE, &content_type, body).await;
    let response = match sent {
        Ok(response) => ApiResponse::read(UPLOAD_ROUTE, response).await,
        Err(err) => Err(err),
    };

    // The server may answer before consuming the whole body; make sure the
    // encoder stops instead of blocking on a full conduit.
    let dropped = closer.close();
    if dropped > 0 {
        debug!(bytes = dropped, "discarded unsent upload bytes");
    }
    if let Err(err) = encoder.await {
        debug!("upload encoder task failed: {err}");
    }

    Ok(classify_upload_response(&response?)?)
}
