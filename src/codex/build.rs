//! Waiting for a codex kernel image build.
//!
//! The server exposes the build as a status plus an append-only log that is
//! read in pages starting at a cursor. A watcher first asks for an empty
//! page to see whether a build is running at all, then keeps fetching pages
//! until the status leaves `pending`, writing every log line exactly once.

use std::fmt;
use std::future::Future;
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::graphql::{CodexBuild, GraphQlClient, GraphQlError};

pub const DEFAULT_PAGE_SIZE: u64 = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Pending,
    Built,
    Failed,
    /// A status this client does not know. Treated as a finished, failed build.
    Other(String),
}

impl BuildState {
    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => BuildState::Pending,
            "built" => BuildState::Built,
            "failed" => BuildState::Failed,
            other => BuildState::Other(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BuildState::Pending)
    }

    pub fn as_str(&self) -> &str {
        match self {
            BuildState::Pending => "pending",
            BuildState::Built => "built",
            BuildState::Failed => "failed",
            BuildState::Other(value) => value,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of build status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStatus {
    pub state: BuildState,
    pub events: Vec<String>,
    /// Log lines starting at the requested offset.
    pub log: Vec<String>,
}

impl From<CodexBuild> for BuildStatus {
    fn from(build: CodexBuild) -> Self {
        BuildStatus {
            state: BuildState::parse(&build.kernel.build_status),
            events: build.kernel.events.unwrap_or_default(),
            log: build.kernel.build_log.unwrap_or_default(),
        }
    }
}

pub trait BuildStatusSource {
    fn fetch(
        &self,
        codex_id: &str,
        offset: u64,
        limit: u64,
    ) -> impl Future<Output = Result<BuildStatus, GraphQlError>> + Send;
}

impl BuildStatusSource for GraphQlClient {
    async fn fetch(&self, codex_id: &str, offset: u64, limit: u64) -> Result<BuildStatus, GraphQlError> {
        let build = self.codex_build(codex_id, offset, limit).await?;
        debug!(
            codex = %build.name,
            id = %build.codex_id,
            status = %build.kernel.build_status,
            "fetched kernel build status"
        );
        Ok(BuildStatus::from(build))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("failed to query kernel build status")]
    Query(#[source] GraphQlError),

    #[error("kernel build was cancelled while waiting")]
    Cancelled,

    #[error("kernel build did not finish within {} seconds", .0.as_secs())]
    TimedOut(Duration),

    #[error("kernel build failed (got status: {0})")]
    BuildFailed(BuildState),

    #[error("failed to write build log")]
    Output(#[source] io::Error),
}

/// A build that finished successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedBuild {
    pub events: Vec<String>,
    /// Number of log lines written.
    pub log_lines: u64,
    /// The image already existed; no build ran while waiting.
    pub cached: bool,
}

pub struct BuildWatcher<'a, S> {
    source: &'a S,
    codex_id: &'a str,
    page_size: u64,
    interval: Duration,
}

impl<'a, S: BuildStatusSource> BuildWatcher<'a, S> {
    pub fn new(source: &'a S, codex_id: &'a str) -> Self {
        Self {
            source,
            codex_id,
            page_size: DEFAULT_PAGE_SIZE,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Streams the build log to `out` until the build reaches a terminal
    /// state, `cancel` fires or `timeout` elapses.
    pub async fn wait<W: Write>(
        &self,
        out: &mut W,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<FinishedBuild, WaitError> {
        let deadline = Instant::now() + timeout;

        let first = self.fetch(0, 0, cancel, deadline, timeout).await?;
        if first.state.is_terminal() {
            info!("kernel image already exists (using cached image)");
            return finish(first, 0, true);
        }

        info!(
            "waiting for kernel build to complete (this may take up to {} minutes)...",
            timeout.as_secs().div_ceil(60)
        );

        let mut cursor = 0u64;
        loop {
            debug!(codex_id = self.codex_id, cursor, "querying kernel build status");
            let status = self.fetch(cursor, self.page_size, cancel, deadline, timeout).await?;

            // Entries are raw output chunks and carry their own line breaks.
            for entry in &status.log {
                out.write_all(entry.as_bytes()).map_err(WaitError::Output)?;
            }
            out.flush().map_err(WaitError::Output)?;
            let received = status.log.len() as u64;
            cursor += received;

            if status.state.is_terminal() {
                return finish(status, cursor, false);
            }
            if received >= self.page_size {
                // More lines are probably already available.
                continue;
            }

            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = cancel.cancelled() => return Err(WaitError::Cancelled),
                _ = sleep_until(deadline) => return Err(WaitError::TimedOut(timeout)),
            }
        }
    }

    async fn fetch(
        &self,
        offset: u64,
        limit: u64,
        cancel: &CancellationToken,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<BuildStatus, WaitError> {
        tokio::select! {
            result = self.source.fetch(self.codex_id, offset, limit) => result.map_err(WaitError::Query),
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
            _ = sleep_until(deadline) => Err(WaitError::TimedOut(timeout)),
        }
    }
}

fn finish(status: BuildStatus, log_lines: u64, cached: bool) -> Result<FinishedBuild, WaitError> {
    if status.state == BuildState::Built {
        return Ok(FinishedBuild {
            events: status.events,
            log_lines,
            cached,
        });
    }
    if let BuildState::Other(value) = &status.state {
        warn!("kernel build finished with unrecognized status {value:?}");
    }
    Err(WaitError::BuildFailed(status.state))
}

/// Stdout sink for build logs that strips ANSI escapes unless stdout is a
/// terminal.
pub struct LogSink<W> {
    inner: W,
    strip_ansi: bool,
}

impl LogSink<io::Stdout> {
    pub fn stdout() -> Self {
        let stdout = io::stdout();
        let strip_ansi = !stdout.is_terminal();
        Self::new(stdout, strip_ansi)
    }
}

impl<W: Write> LogSink<W> {
    pub fn new(inner: W, strip_ansi: bool) -> Self {
        Self { inner, strip_ansi }
    }
}

impl<W: Write> Write for LogSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.strip_ansi {
            self.inner.write_all(&strip_ansi_escapes::strip(buf))?;
            Ok(buf.len())
        } else {
            self.inner.write(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
