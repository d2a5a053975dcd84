//! Progress reporting for uploads and downloads.
//!
//! Provides byte-level feedback while archives stream to or from remote
//! storage.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, ReadBuf};

/// Progress reporter for a single transfer.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Creates a reporter; `total_bytes` of `None` shows a spinner instead of a bar.
    pub fn new(message: &str, total_bytes: Option<u64>) -> Self {
        let bar = match total_bytes {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} {msg} {bytes} ({bytes_per_sec})")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.enable_steady_tick(Duration::from_millis(100));
                bar
            }
        };
        bar.set_message(message.to_string());
        Self { bar }
    }

    /// Creates a reporter that draws nothing.
    pub fn hidden() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::hidden());
        Self { bar }
    }

    /// Adds transferred bytes.
    pub fn inc(&self, bytes: u64) {
        self.bar.inc(bytes);
    }

    /// Bytes reported so far.
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Finishes the transfer with a final message.
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finishes and clears the bar.
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for TransferProgress {
    fn default() -> Self {
        Self::hidden()
    }
}

/// Async reader that reports every byte it yields to a [`TransferProgress`].
pub struct ProgressReader<R> {
    inner: R,
    progress: TransferProgress,
}

impl<R: AsyncRead + Unpin> ProgressReader<R> {
    pub fn new(inner: R, progress: TransferProgress) -> Self {
        Self { inner, progress }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = buf.filled().len() - before;
            self.progress.inc(read as u64);
        }
        poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_transfer_progress_lifecycle() {
        let progress = TransferProgress::hidden();
        progress.inc(10);
        progress.inc(5);
        assert_eq!(progress.position(), 15);
        progress.finish("Upload complete");
    }

    #[test]
    fn test_spinner_without_total() {
        let progress = TransferProgress::new("Downloading...", None);
        progress.inc(3);
        progress.finish_and_clear();
    }

    #[tokio::test]
    async fn test_progress_reader_counts_bytes() {
        let progress = TransferProgress::hidden();
        let data = vec![7u8; 4096];
        let mut reader = ProgressReader::new(data.as_slice(), progress.clone());

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out.len(), 4096);
        assert_eq!(progress.position(), 4096);
    }
}
