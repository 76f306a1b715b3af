//! Driving a [`Response`] into a transport.
//!
//! Every body, whatever its representation, is flattened into one chunk
//! stream and wrapped in [`Guarded`]. The guard is the single place that
//! enforces the terminal contract: a body ends exactly once, either complete
//! (with the number of bytes written) or failed, and nothing is emitted after
//! that. hyper consumes the guard through [`Response::into_http`]; other
//! transports implement [`ResponseSink`] and call [`drive`].

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use http::{HeaderMap, StatusCode};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::response::Response;

/// The write side of a transport.
///
/// [`drive`] calls `write_head` once, then `write_chunk` zero or more times,
/// then exactly one of `complete` or `fail`.
#[async_trait]
pub trait ResponseSink: Send {
    async fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> Result<()>;

    /// Writes one body chunk. An error here means the peer is gone; the body
    /// source is dropped and the response is failed.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<()>;

    async fn complete(&mut self, bytes_written: u64);

    async fn fail(&mut self, error: &Error);
}

/// Writes `response` into `sink`, returning the number of body bytes written.
pub async fn drive<S>(response: Response, sink: &mut S) -> Result<u64>
where
    S: ResponseSink + ?Sized,
{
    let (status, headers, body) = response.into_parts();
    if let Err(e) = sink.write_head(status, &headers).await {
        sink.fail(&e).await;
        return Err(e);
    }

    let mut chunks = Guarded::new(body.into_stream());
    while let Some(chunk) = chunks.next().await {
        let written = match chunk {
            Ok(chunk) => sink.write_chunk(chunk).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            chunks.abort();
            sink.fail(&e).await;
            return Err(e);
        }
    }

    let total = chunks.bytes_written();
    sink.complete(total).await;
    Ok(total)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Open,
    Complete,
    Failed,
}

/// A chunk stream with at most one terminal transition.
///
/// After the source ends or yields an error, the guard returns `None`
/// forever and drops the source. Dropping an open guard (the client went
/// away mid-body) drops the source too, which closes channels and cancels
/// upstream streams.
pub struct Guarded {
    source: Option<BoxStream<'static, Result<Bytes>>>,
    state: State,
    written: u64,
}

impl Guarded {
    pub fn new(source: BoxStream<'static, Result<Bytes>>) -> Self {
        Self { source: Some(source), state: State::Open, written: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_terminated(&self) -> bool {
        self.state != State::Open
    }

    /// Marks the body failed and releases the source.
    pub fn abort(&mut self) {
        if self.state == State::Open {
            self.state = State::Failed;
            self.source = None;
        }
    }
}

impl Stream for Guarded {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(source) = this.source.as_mut() else {
            return Poll::Ready(None);
        };
        match source.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.written += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                error!(error = %e, written = this.written, "body source failed mid-response");
                this.state = State::Failed;
                this.source = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                debug!(written = this.written, "body complete");
                this.state = State::Complete;
                this.source = None;
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for Guarded {
    fn drop(&mut self) {
        if self.state == State::Open && self.source.is_some() {
            debug!(written = self.written, "body dropped before completion, cancelling source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    use crate::response::{Body, ContentType};

    #[derive(Default)]
    struct Recording {
        head: Option<StatusCode>,
        chunks: Vec<Bytes>,
        completed: Vec<u64>,
        failed: usize,
    }

    #[async_trait]
    impl ResponseSink for Recording {
        async fn write_head(&mut self, status: StatusCode, _: &HeaderMap) -> Result<()> {
            self.head = Some(status);
            Ok(())
        }

        async fn write_chunk(&mut self, chunk: Bytes) -> Result<()> {
            self.chunks.push(chunk);
            Ok(())
        }

        async fn complete(&mut self, bytes_written: u64) {
            self.completed.push(bytes_written);
        }

        async fn fail(&mut self, _: &Error) {
            self.failed += 1;
        }
    }

    #[tokio::test]
    async fn completes_once_with_byte_count() {
        let mut sink = Recording::default();
        let res = Response::builder().body(Body::iter(["hello ", "world"]));
        assert_eq!(drive(res, &mut sink).await.unwrap(), 11);
        assert_eq!(sink.head, Some(StatusCode::OK));
        assert_eq!(sink.chunks.concat(), b"hello world");
        assert_eq!(sink.completed, vec![11]);
        assert_eq!(sink.failed, 0);
    }

    #[tokio::test]
    async fn failure_stops_the_body() {
        let source = stream::iter(vec![
            Ok("first"),
            Err(std::io::Error::other("upstream reset")),
            Ok("never sent"),
        ]);
        let res = Response::builder().stream(ContentType::Text, source);
        let mut sink = Recording::default();

        let err = drive(res, &mut sink).await.unwrap_err();
        assert_eq!(err.kind(), "stream");
        assert_eq!(sink.chunks, vec![Bytes::from_static(b"first")]);
        assert_eq!(sink.failed, 1);
        assert!(sink.completed.is_empty());
    }

    #[tokio::test]
    async fn guard_yields_nothing_after_terminal() {
        let source = stream::iter(vec![Err(Error::handler("boom")), Ok(Bytes::from_static(b"x"))]);
        let mut guarded = Guarded::new(source.boxed());
        assert!(guarded.next().await.unwrap().is_err());
        assert!(guarded.is_terminated());
        assert!(guarded.next().await.is_none());
        assert!(guarded.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_body_closes_the_channel() {
        let (tx, rx) = tokio::sync::mpsc::channel::<&'static str>(1);
        let guarded = Guarded::new(Body::channel(rx).into_stream());
        drop(guarded);
        assert!(tx.is_closed());
    }
}
