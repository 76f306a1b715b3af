//! Outgoing HTTP response type and its body representations.
//!
//! A [`Response`] carries a status, a header map, and exactly one [`Body`]:
//! a complete byte buffer, a lazy byte iterator, a single deferred value, or
//! an asynchronous stream of chunks. Status and headers are fixed before the
//! first body byte leaves the process.

use std::fmt;
use std::future::Future;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{BoxError, Error, Result};
use crate::writer::Guarded;

/// Body type handed to hyper.
pub type HttpBody = UnsyncBoxBody<Bytes, BoxError>;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,          // text/css
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Javascript,   // text/javascript
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Javascript  => "text/javascript",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }

    /// Guesses a content type from a file extension. Unknown extensions map
    /// to `application/octet-stream`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css"          => Self::Css,
            "htm" | "html" => Self::Html,
            "js" | "mjs"   => Self::Javascript,
            "json"         => Self::Json,
            "png"          => Self::Png,
            "svg"          => Self::Svg,
            "txt"          => Self::Text,
            _              => Self::OctetStream,
        }
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// The body of a [`Response`]. Exactly one representation is active.
pub enum Body {
    /// A complete byte buffer.
    Full(Bytes),
    /// A lazy, synchronous producer of chunks.
    Iter(Box<dyn Iterator<Item = Bytes> + Send>),
    /// A single value that becomes available later.
    Deferred(BoxFuture<'static, Result<Bytes>>),
    /// Chunks emitted asynchronously, in order.
    Stream(BoxStream<'static, Result<Bytes>>),
}

impl Body {
    pub fn empty() -> Self {
        Self::Full(Bytes::new())
    }

    pub fn iter<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Bytes> + 'static,
    {
        Self::Iter(Box::new(chunks.into_iter().map(Into::into)))
    }

    pub fn deferred<F, B>(fut: F) -> Self
    where
        F: Future<Output = Result<B>> + Send + 'static,
        B: Into<Bytes> + 'static,
    {
        Self::Deferred(Box::pin(async move { fut.await.map(Into::into) }))
    }

    /// A body fed by an asynchronous stream. Source errors fail the response.
    pub fn stream<S, B, E>(source: S) -> Self
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(source.map(|item| item.map(Into::into).map_err(Error::stream)).boxed())
    }

    /// A multi-chunk body fed by a channel; the body completes when every
    /// sender is dropped. Dropping the body closes the receiver.
    pub fn channel<B>(rx: mpsc::Receiver<B>) -> Self
    where
        B: Into<Bytes> + Send + 'static,
    {
        let chunks = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok(chunk.into()), rx))
        });
        Self::Stream(chunks.boxed())
    }

    /// Flattens any representation into one chunk stream.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes>> {
        match self {
            Self::Full(bytes) if bytes.is_empty() => stream::empty().boxed(),
            Self::Full(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Self::Iter(chunks) => stream::iter(chunks.map(Ok)).boxed(),
            Self::Deferred(fut) => stream::once(fut).boxed(),
            Self::Stream(chunks) => chunks,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Full(bytes)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Full(text.into())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Full(bytes.into())
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(b) => f.debug_tuple("Full").field(&b.len()).finish(),
            Self::Iter(_) => f.write_str("Iter(..)"),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use spindle::Response;
/// use http::StatusCode;
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// ```
///
/// # Builder (custom status, headers, or streaming bodies)
///
/// ```rust
/// use spindle::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// let (tx, rx) = tokio::sync::mpsc::channel::<&'static str>(8);
/// Response::builder().channel(ContentType::Text, rx);
/// # drop(tx);
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
}

impl Response {
    /// `200 OK` — `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` — `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: code, headers: HeaderMap::new(), body: Body::empty() }
    }

    /// Builder for responses that need a custom status, extra headers, or a
    /// streaming body.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub(crate) fn not_found() -> Self {
        Self::builder().status(StatusCode::NOT_FOUND).text("not found")
    }

    pub(crate) fn internal_error() -> Self {
        Self::builder().status(StatusCode::INTERNAL_SERVER_ERROR).text("internal server error")
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, code: StatusCode) {
        self.status = code;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Body) {
        (self.status, self.headers, self.body)
    }

    /// Drains the body and concatenates every chunk in emission order.
    pub async fn collect(self) -> Result<Bytes> {
        let mut chunks = Guarded::new(self.body.into_stream());
        let mut buf = BytesMut::new();
        while let Some(chunk) = chunks.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Converts into the response type hyper writes to the connection.
    ///
    /// Complete buffers keep their `content-length`; every other body is sent
    /// chunked through a [`Guarded`] stream so the transport sees exactly one
    /// terminal signal.
    pub fn into_http(self) -> http::Response<HttpBody> {
        let body: HttpBody = match self.body {
            Body::Full(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed_unsync(),
            other => {
                let frames = Guarded::new(other.into_stream())
                    .map(|chunk| chunk.map(Frame::data).map_err(BoxError::from));
                StreamBody::new(frames).boxed_unsync()
            }
        };
        let mut res = http::Response::new(body);
        *res.status_mut() = self.status;
        *res.headers_mut() = self.headers;
        res
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. Terminated by a
/// typed body method.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Names or values that are not valid HTTP are logged
    /// and skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = name, "skipping invalid response header"),
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, Body::Full(body.into()))
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Body::from(body.into()))
    }

    /// Terminate with a typed body. Use this for HTML, binary, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, Body::Full(body.into()))
    }

    /// Terminate with a channel-fed body; each received item is one chunk.
    pub fn channel<B>(self, content_type: ContentType, rx: mpsc::Receiver<B>) -> Response
    where
        B: Into<Bytes> + Send + 'static,
    {
        self.finish(content_type, Body::channel(rx))
    }

    /// Terminate with a stream-fed body.
    pub fn stream<S, B, E>(self, content_type: ContentType, source: S) -> Response
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        self.finish(content_type, Body::stream(source))
    }

    /// Terminate with any [`Body`], leaving `content-type` to the caller.
    pub fn body(self, body: Body) -> Response {
        Response { status: self.status, headers: self.headers, body }
    }

    /// Terminate with no body (e.g. `204 No Content`, redirects).
    pub fn no_body(self) -> Response {
        self.body(Body::empty())
    }

    fn finish(mut self, content_type: ContentType, body: Body) -> Response {
        self.headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static(content_type.as_str()));
        self.body(body)
    }
}
