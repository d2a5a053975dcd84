//! Bounded pipe between blocking archive code and async network code.
//!
//! The tar and compression codecs are blocking `std::io::Write` consumers,
//! while storage backends read uploads through `tokio::io::AsyncRead`. A
//! [`PipeWriter`] runs on a blocking thread and hands fixed-size chunks to
//! the matching [`PipeReader`] over a bounded channel, so memory use is
//! `capacity * chunk_size` regardless of archive size.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

/// Default size of a chunk handed across the pipe.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default number of chunks buffered between producer and consumer.
pub const DEFAULT_CAPACITY: usize = 8;

type Chunk = io::Result<Bytes>;

/// Creates a pipe buffering at most `capacity` chunks of [`DEFAULT_CHUNK_SIZE`].
pub fn bounded(capacity: usize) -> (PipeWriter, PipeReader) {
    with_chunk_size(capacity, DEFAULT_CHUNK_SIZE)
}

/// Creates a pipe with an explicit chunk size.
pub fn with_chunk_size(capacity: usize, chunk_size: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let finished = Arc::new(AtomicBool::new(false));

    let writer = PipeWriter {
        tx,
        buf: BytesMut::with_capacity(chunk_size),
        chunk_size: chunk_size.max(1),
        finished: Arc::clone(&finished),
    };
    (writer, PipeReader::new(rx, finished))
}

/// Blocking write half of a pipe.
///
/// Must only be used from a blocking context such as
/// `tokio::task::spawn_blocking`. Close it with [`PipeWriter::finish`] on
/// success or [`PipeWriter::fail`] on error; a writer dropped without
/// either makes the reader fail with `UnexpectedEof`.
pub struct PipeWriter {
    tx: mpsc::Sender<Chunk>,
    buf: BytesMut,
    chunk_size: usize,
    finished: Arc<AtomicBool>,
}

impl PipeWriter {
    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader was dropped")
        })
    }

    /// Flushes remaining bytes and signals a clean end of stream.
    pub fn finish(mut self) -> io::Result<()> {
        self.send_buffered()?;
        self.finished.store(true, Ordering::Release);
        Ok(())
    }

    /// Delivers `err` to the reader instead of a clean end of stream.
    pub fn fail(self, err: io::Error) {
        // The reader may already be gone; nothing left to notify then
        let _ = self.tx.blocking_send(Err(err));
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = data.len().min(room);
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= self.chunk_size {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Async read half of a pipe.
pub struct PipeReader {
    inner: StreamReader<BoxStream<'static, Chunk>, Bytes>,
}

impl PipeReader {
    fn new(rx: mpsc::Receiver<Chunk>, finished: Arc<AtomicBool>) -> Self {
        let chunks = stream::unfold(Some(rx), move |state| {
            let finished = Arc::clone(&finished);
            async move {
                let mut rx = state?;
                match rx.recv().await {
                    Some(chunk) => Some((chunk, Some(rx))),
                    None if finished.load(Ordering::Acquire) => None,
                    None => Some((
                        Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "archive producer stopped before finishing",
                        )),
                        None,
                    )),
                }
            }
        })
        .boxed();

        Self {
            inner: StreamReader::new(chunks),
        }
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
