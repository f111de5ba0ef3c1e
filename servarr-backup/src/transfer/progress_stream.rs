//! Byte-counting wrapper for the backup download stream.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

/// Called with the running byte total
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Passes chunks through untouched, reporting the total read at most once per
/// `report_every` and once more at end of stream.
pub struct ProgressStream<S> {
    inner: S,
    bytes_read: u64,
    last_report: Instant,
    report_every: Duration,
    on_progress: ProgressCallback,
}

impl<S> ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    pub fn new(inner: S, report_every: Duration, on_progress: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_read: 0,
            last_report: Instant::now(),
            report_every,
            on_progress,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.bytes_read += chunk.len() as u64;

                let now = Instant::now();
                if now.duration_since(self.last_report) >= self.report_every {
                    (self.on_progress)(self.bytes_read);
                    self.last_report = now;
                }

                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                (self.on_progress)(self.bytes_read);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
