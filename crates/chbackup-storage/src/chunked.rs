//! Chunked upload driver shared by the multipart-capable backends.
//!
//! The body is read one part at a time, so at most `concurrency + 1` parts
//! are held in memory. A body that fits into one part is sent with a single
//! request. Any part failure or cancellation aborts the multipart session.

use crate::error::{Result, StorageError};
use crate::traits::RemoteReader;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A part accepted by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    /// 1-based part number
    pub number: i32,
    pub etag: String,
}

/// Provider side of a multipart upload to one object.
#[async_trait]
pub trait MultipartSink: Clone + Send + Sync + 'static {
    /// Uploads a small body in one request.
    async fn put_single(&self, body: Bytes) -> Result<()>;

    /// Starts a multipart session, returning its upload id.
    async fn begin(&self) -> Result<String>;

    async fn upload_part(&self, upload_id: &str, number: i32, body: Bytes)
        -> Result<CompletedPart>;

    /// Commits the parts, which arrive sorted by part number.
    async fn complete(&self, upload_id: &str, parts: Vec<CompletedPart>) -> Result<()>;

    /// Discards the session and any parts uploaded so far.
    async fn abort(&self, upload_id: &str) -> Result<()>;
}

/// Upper bound on the buffer reserved before any byte of a part arrives
const INITIAL_PART_CAPACITY: usize = 8 * 1024 * 1024;

/// Buffer for a part of up to `size` bytes; larger parts grow as they fill.
fn part_buffer(size: usize) -> Vec<u8> {
    Vec::with_capacity(size.min(INITIAL_PART_CAPACITY))
}

/// Reads up to `size` bytes, fewer only at end of stream.
pub async fn read_part<R>(reader: &mut R, size: usize) -> io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = part_buffer(size);
    (&mut *reader).take(size as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// Streams `reader` into `sink`, returning the number of bytes uploaded.
pub async fn upload_chunked<S: MultipartSink>(
    sink: S,
    mut reader: RemoteReader,
    part_size: usize,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<u64> {
    let part_size = part_size.max(1);

    let first = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StorageError::Cancelled),
        part = read_part(&mut reader, part_size) => part?,
    };
    if first.len() < part_size {
        let size = first.len() as u64;
        sink.put_single(first).await?;
        return Ok(size);
    }

    let upload_id = sink.begin().await?;
    tracing::debug!("Started multipart upload {}", upload_id);

    let result = match upload_parts(
        &sink,
        &upload_id,
        first,
        reader,
        part_size,
        concurrency,
        cancel,
    )
    .await
    {
        Ok((parts, total)) => {
            let count = parts.len();
            sink.complete(&upload_id, parts).await.map(|()| {
                tracing::debug!("Completed multipart upload {} with {} parts", upload_id, count);
                total
            })
        }
        Err(e) => Err(e),
    };

    if result.is_err() {
        if let Err(abort_err) = sink.abort(&upload_id).await {
            tracing::warn!("Failed to abort multipart upload {}: {}", upload_id, abort_err);
        } else {
            tracing::debug!("Aborted multipart upload {}", upload_id);
        }
    }
    result
}

async fn upload_parts<S: MultipartSink>(
    sink: &S,
    upload_id: &str,
    first: Bytes,
    mut reader: RemoteReader,
    part_size: usize,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Result<(Vec<CompletedPart>, u64)> {
    let concurrency = concurrency.max(1);
    let mut in_flight: JoinSet<Result<CompletedPart>> = JoinSet::new();
    let mut parts = Vec::new();
    let mut total = 0u64;
    let mut pending = Some(first);
    let mut number = 1i32;

    loop {
        let body = match pending.take() {
            Some(body) => body,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StorageError::Cancelled),
                part = read_part(&mut reader, part_size) => part?,
            },
        };
        if body.is_empty() {
            break;
        }
        let last = body.len() < part_size;
        total += body.len() as u64;

        while in_flight.len() >= concurrency {
            if let Some(part) = next_finished(&mut in_flight, cancel).await? {
                parts.push(part);
            }
        }

        let sink = sink.clone();
        let upload_id = upload_id.to_string();
        in_flight.spawn(async move { sink.upload_part(&upload_id, number, body).await });
        number += 1;

        if last {
            break;
        }
    }

    while let Some(part) = next_finished(&mut in_flight, cancel).await? {
        parts.push(part);
    }

    parts.sort_by_key(|p| p.number);
    Ok((parts, total))
}

async fn next_finished(
    in_flight: &mut JoinSet<Result<CompletedPart>>,
    cancel: &CancellationToken,
) -> Result<Option<CompletedPart>> {
    let joined = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(StorageError::Cancelled),
        joined = in_flight.join_next() => joined,
    };
    match joined {
        None => Ok(None),
        Some(Ok(part)) => part.map(Some),
        Some(Err(e)) => Err(StorageError::Io(io::Error::other(e))),
    }
}
