//! Handler return values and the response coercer.
//!
//! Handlers may answer with a finished [`Response`], plain text or bytes, a
//! future, a channel, or a stream. [`Reply`] is the closed set of those
//! shapes; [`coerce`] turns any of them into a [`Response`] whose head is
//! final and whose body may still be streaming.
//!
//! Classification, first match wins:
//!
//! | Reply | Response |
//! |---|---|
//! | `Response` | used as-is |
//! | `Text` / `Bytes` / `Status` | single chunk, `200` unless a status is given |
//! | `Channel` | the **first** item received is the final value, re-classified |
//! | `Deferred` | awaited, then re-classified |
//! | `Stream` | every element becomes one body chunk, in emission order |
//! | `Opaque` | downcast to a known shape, or [`Error::Coercion`] |
//!
//! A channel returned as the whole reply is a single deferred value. To
//! stream a channel chunk by chunk, hand it to
//! [`ResponseBuilder::channel`](crate::response::ResponseBuilder::channel)
//! instead.

use std::any::Any;
use std::fmt;
use std::future::Future;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use http::StatusCode;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{BoxError, Error, Result};
use crate::response::{Body, ContentType, Response};

/// Every value a handler may produce.
pub enum Reply {
    Response(Response),
    Text(String),
    Bytes(Bytes),
    Status(StatusCode),
    Channel(mpsc::Receiver<Reply>),
    Deferred(BoxFuture<'static, Result<Reply>>),
    Stream(BoxStream<'static, Result<Reply>>),
    Opaque { value: Box<dyn Any + Send>, type_name: &'static str },
}

impl Reply {
    /// A reply that becomes available when `fut` resolves.
    pub fn deferred<F, R>(fut: F) -> Self
    where
        F: Future<Output = R> + Send + 'static,
        R: IntoReply + 'static,
    {
        Self::Deferred(Box::pin(async move { Ok(fut.await.into_reply()) }))
    }

    /// Like [`deferred`](Reply::deferred), for futures that can fail. The
    /// error goes to the nearest error handler.
    pub fn try_deferred<F, R, E>(fut: F) -> Self
    where
        F: Future<Output = std::result::Result<R, E>> + Send + 'static,
        R: IntoReply + 'static,
        E: Into<Error> + 'static,
    {
        Self::Deferred(Box::pin(async move { fut.await.map(IntoReply::into_reply).map_err(Into::into) }))
    }

    /// A streamed reply. Each element must be text or bytes.
    pub fn stream<S, R, E>(source: S) -> Self
    where
        S: Stream<Item = std::result::Result<R, E>> + Send + 'static,
        R: IntoReply + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::Stream(source.map(|item| item.map(IntoReply::into_reply).map_err(Error::stream)).boxed())
    }

    /// Wraps a value of any type. The coercer recognizes the common response
    /// types by downcasting and rejects everything else.
    pub fn opaque<T: Any + Send>(value: T) -> Self {
        Self::Opaque { value: Box::new(value), type_name: std::any::type_name::<T>() }
    }

    fn shape(&self) -> &'static str {
        match self {
            Self::Response(_) => "response",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Status(_) => "status",
            Self::Channel(_) => "channel",
            Self::Deferred(_) => "deferred",
            Self::Stream(_) => "stream",
            Self::Opaque { type_name, .. } => *type_name,
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reply").field(&self.shape()).finish()
    }
}

/// Normalizes a reply into a [`Response`].
///
/// Futures and top-level channels are awaited without blocking the worker,
/// so the resolved value may carry its own status and headers. Streams are
/// not drained here: they become the body of a `200` response and are pulled
/// by the transport.
pub async fn coerce(reply: Reply) -> Result<Response> {
    let mut reply = reply;
    loop {
        reply = match reply {
            Reply::Response(res) => return Ok(res),
            Reply::Text(text) => return Ok(Response::text(text)),
            Reply::Bytes(bytes) => {
                return Ok(Response::builder().bytes(ContentType::OctetStream, bytes));
            }
            Reply::Status(code) => return Ok(Response::status(code)),
            Reply::Channel(mut rx) => {
                let first = rx
                    .recv()
                    .await
                    .ok_or(Error::Coercion { type_name: "empty reply channel" })?;
                debug!(shape = first.shape(), "reply channel produced its value");
                first
            }
            Reply::Deferred(fut) => fut.await?,
            Reply::Stream(elements) => {
                let chunks = elements.map(|element| element.and_then(into_chunk));
                return Ok(Response::builder().body(Body::Stream(chunks.boxed())));
            }
            Reply::Opaque { value, type_name } => downcast(value, type_name)?,
        };
    }
}

fn into_chunk(element: Reply) -> Result<Bytes> {
    match element {
        Reply::Text(text) => Ok(text.into()),
        Reply::Bytes(bytes) => Ok(bytes),
        other => Err(Error::Coercion { type_name: other.shape() }),
    }
}

fn downcast(value: Box<dyn Any + Send>, type_name: &'static str) -> Result<Reply> {
    let value = match value.downcast::<Reply>() {
        Ok(reply) => return Ok(*reply),
        Err(value) => value,
    };
    let value = match value.downcast::<Response>() {
        Ok(res) => return Ok(Reply::Response(*res)),
        Err(value) => value,
    };
    let value = match value.downcast::<String>() {
        Ok(text) => return Ok(Reply::Text(*text)),
        Err(value) => value,
    };
    let value = match value.downcast::<&'static str>() {
        Ok(text) => return Ok(Reply::Text((*text).to_owned())),
        Err(value) => value,
    };
    let value = match value.downcast::<Vec<u8>>() {
        Ok(bytes) => return Ok(Reply::Bytes((*bytes).into())),
        Err(value) => value,
    };
    let value = match value.downcast::<Bytes>() {
        Ok(bytes) => return Ok(Reply::Bytes(*bytes)),
        Err(value) => value,
    };
    match value.downcast::<StatusCode>() {
        Ok(code) => Ok(Reply::Status(*code)),
        Err(_) => Err(Error::Coercion { type_name }),
    }
}

// ── IntoReply ─────────────────────────────────────────────────────────────────

/// Conversion into a [`Reply`].
///
/// Implement on your own types to return them directly from handlers.
///
/// ```rust,ignore
/// use spindle::{IntoReply, Reply, Response};
/// use serde::Serialize;
///
/// struct Json<T: Serialize>(T);
///
/// impl<T: Serialize> IntoReply for Json<T> {
///     fn into_reply(self) -> Reply {
///         match serde_json::to_vec(&self.0) {
///             Ok(bytes) => Reply::Response(Response::json(bytes)),
///             Err(_) => Reply::Status(http::StatusCode::INTERNAL_SERVER_ERROR),
///         }
///     }
/// }
/// ```
pub trait IntoReply: Send {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Reply {
    fn into_reply(self) -> Reply { self }
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply { Reply::Response(self) }
}

impl IntoReply for String {
    fn into_reply(self) -> Reply { Reply::Text(self) }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Reply { Reply::Text(self.to_owned()) }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Reply { Reply::Bytes(self) }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Reply { Reply::Bytes(self.into()) }
}

/// Return a status directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoReply for StatusCode {
    fn into_reply(self) -> Reply { Reply::Status(self) }
}

impl IntoReply for mpsc::Receiver<Reply> {
    fn into_reply(self) -> Reply { Reply::Channel(self) }
}

/// A oneshot receiver is a promise: the reply is whatever gets sent.
impl<T> IntoReply for oneshot::Receiver<T>
where
    T: IntoReply + 'static,
{
    fn into_reply(self) -> Reply {
        Reply::Deferred(Box::pin(async move {
            self.await
                .map(IntoReply::into_reply)
                .map_err(|_| Error::handler("promise dropped without a value"))
        }))
    }
}
