//! Cancellation-aware byte streams

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Reader that fails with an error once `token` is cancelled.
///
/// A pending read is woken by the cancellation itself, so a stalled network
/// stream or a blocking consumer behind `SyncIoBridge` stops promptly.
pub struct CancellableReader<R> {
    inner: R,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<R> CancellableReader<R> {
    pub fn new(inner: R, token: CancellationToken) -> Self {
        let cancelled = Box::pin(token.clone().cancelled_owned());
        Self {
            inner,
            token,
            cancelled,
        }
    }
}

/// Error surfaced by a cancelled stream
pub fn cancelled_error() -> io::Error {
    io::Error::other("operation cancelled")
}

impl<R: AsyncRead + Unpin> AsyncRead for CancellableReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.token.is_cancelled() || self.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(Err(cancelled_error()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    struct Stalled;

    impl AsyncRead for Stalled {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    #[tokio::test]
    async fn test_passes_data_through() {
        let mut reader = CancellableReader::new(&b"parts"[..], CancellationToken::new());
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await.unwrap();
        assert_eq!(data, b"parts");
    }

    #[tokio::test]
    async fn test_cancel_wakes_stalled_read() {
        let token = CancellationToken::new();
        let mut reader = CancellableReader::new(Stalled, token.clone());

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let mut data = Vec::new();
        let err = tokio::time::timeout(Duration::from_secs(5), reader.read_to_end(&mut data))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err.to_string(), "operation cancelled");
    }

    #[tokio::test]
    async fn test_already_cancelled_fails_first_read() {
        let token = CancellationToken::new();
        token.cancel();
        let mut reader = CancellableReader::new(&b"parts"[..], token);
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).await.is_err());
    }
}
