//! Bounded in-memory byte pipe between a blocking producer and an async consumer.
//!
//! The writer half implements [`std::io::Write`] and parks its thread until
//! the reader has taken the bytes it wrote, so it must run on a blocking
//! worker (`spawn_blocking` or a plain thread). The reader half implements
//! [`tokio::io::AsyncRead`] and parks its task while the buffer is empty.
//! A write only reports the bytes the reader actually consumed, so the total
//! reported as written always equals the total read. Either half may close at
//! any time:
//!
//! - closing the reader fails every pending and future write with
//!   [`ConduitError::Closed`]; bytes still buffered are discarded and are not
//!   counted as written;
//! - closing the writer lets the reader drain the buffer and then see EOF;
//! - aborting the writer makes the reader see the abort reason as an error
//!   instead of a clean EOF.

use std::collections::VecDeque;
use std::fmt::Display;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use tokio::io::{AsyncRead, ReadBuf};

pub const DEFAULT_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConduitError {
    #[error("conduit closed by reader")]
    Closed,
    #[error("conduit writer aborted: {0}")]
    Aborted(String),
}

impl From<ConduitError> for io::Error {
    fn from(err: ConduitError) -> Self {
        let kind = match err {
            ConduitError::Closed => io::ErrorKind::BrokenPipe,
            ConduitError::Aborted(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

struct State {
    buf: VecDeque<u8>,
    capacity: usize,
    /// Total bytes handed to the buffer by the writer.
    pushed: u64,
    /// Total bytes taken out of the buffer by the reader.
    consumed: u64,
    reader_closed: bool,
    writer_closed: bool,
    abort: Option<String>,
    read_waker: Option<Waker>,
}

impl State {
    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }
}

struct Shared {
    state: Mutex<State>,
    /// Signalled whenever the reader consumes bytes or closes.
    progress: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn wait<'a>(&self, state: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.progress
            .wait(state)
            .unwrap_or_else(|err| err.into_inner())
    }

    fn close_reader(&self) -> usize {
        let mut state = self.lock();
        state.reader_closed = true;
        let discarded = state.buf.len();
        state.buf = VecDeque::new();
        drop(state);
        self.progress.notify_all();
        discarded
    }

    fn close_writer(&self, abort: Option<String>) {
        let mut state = self.lock();
        if state.writer_closed {
            return;
        }
        state.writer_closed = true;
        state.abort = abort;
        state.wake_reader();
    }
}

/// Creates a conduit whose buffer holds at most `capacity` bytes.
pub fn conduit(capacity: usize) -> (ConduitWriter, ConduitReader) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            pushed: 0,
            consumed: 0,
            reader_closed: false,
            writer_closed: false,
            abort: None,
            read_waker: None,
        }),
        progress: Condvar::new(),
    });
    (
        ConduitWriter {
            shared: Arc::clone(&shared),
        },
        ConduitReader { shared },
    )
}

/// Producer half. Dropping it is equivalent to [`ConduitWriter::close`].
pub struct ConduitWriter {
    shared: Arc<Shared>,
}

impl ConduitWriter {
    /// Hands up to `capacity` bytes of `data` to the reader and blocks until
    /// the reader has consumed them. Returns how many were consumed.
    ///
    /// If the reader closes part way through, the consumed prefix is reported
    /// and the next call fails; if nothing was consumed the call fails with
    /// [`ConduitError::Closed`].
    pub fn write_some(&mut self, data: &[u8]) -> Result<usize, ConduitError> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut state = self.shared.lock();
        if state.reader_closed {
            return Err(ConduitError::Closed);
        }

        // The previous write waited for its bytes to be consumed, so the
        // buffer is empty here.
        let n = state.capacity.min(data.len());
        let start = state.pushed;
        state.buf.extend(&data[..n]);
        state.pushed += n as u64;
        let end = state.pushed;
        state.wake_reader();

        while state.consumed < end && !state.reader_closed {
            state = self.shared.wait(state);
        }

        match state.consumed.saturating_sub(start) as usize {
            0 => Err(ConduitError::Closed),
            taken => Ok(taken.min(n)),
        }
    }

    /// Signals end of stream.
    pub fn close(self) {
        self.shared.close_writer(None);
    }

    /// Ends the stream with an error. The reader sees `reason` instead of EOF.
    pub fn abort(self, reason: impl Display) {
        self.shared.close_writer(Some(reason.to_string()));
    }

    pub fn is_reader_closed(&self) -> bool {
        self.shared.lock().reader_closed
    }
}

impl io::Write for ConduitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_some(buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.is_reader_closed() {
            return Err(ConduitError::Closed.into());
        }
        Ok(())
    }
}

impl Drop for ConduitWriter {
    fn drop(&mut self) {
        self.shared.close_writer(None);
    }
}

/// Consumer half. Dropping it is equivalent to [`ConduitReader::close`].
pub struct ConduitReader {
    shared: Arc<Shared>,
}

impl ConduitReader {
    /// A handle that can close this reader after it has been moved elsewhere
    /// (e.g. into an HTTP request body).
    pub fn closer(&self) -> ConduitCloser {
        ConduitCloser {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Closes the read side, returning the number of unread bytes discarded.
    pub fn close(&self) -> usize {
        self.shared.close_reader()
    }
}

impl AsyncRead for ConduitReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut state = self.shared.lock();

        if !state.buf.is_empty() {
            let n = buf.remaining().min(state.buf.len());
            let (head, tail) = state.buf.as_slices();
            let from_head = n.min(head.len());
            buf.put_slice(&head[..from_head]);
            if n > from_head {
                buf.put_slice(&tail[..n - from_head]);
            }
            state.buf.drain(..n);
            state.consumed += n as u64;
            drop(state);
            self.shared.progress.notify_all();
            return Poll::Ready(Ok(()));
        }

        if let Some(reason) = &state.abort {
            return Poll::Ready(Err(ConduitError::Aborted(reason.clone()).into()));
        }
        if state.writer_closed {
            return Poll::Ready(Ok(()));
        }
        if state.reader_closed {
            return Poll::Ready(Err(ConduitError::Closed.into()));
        }

        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for ConduitReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Clonable handle that closes the read side of a conduit.
#[derive(Clone)]
pub struct ConduitCloser {
    shared: Arc<Shared>,
}

impl ConduitCloser {
    pub fn close(&self) -> usize {
        self.shared.close_reader()
    }
}
