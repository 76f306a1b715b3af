//! Server-sent events.
//!
//! An [`Sse`] response turns a stream of [`Event`]s into a
//! `text/event-stream` body. Each event is framed as it arrives, so a client
//! sees it as soon as the producer emits it:
//!
//! ```rust
//! use std::time::Duration;
//! use spindle::{Context, sse};
//!
//! async fn ticks(_ctx: Context) -> sse::Sse {
//!     let (tx, events) = sse::channel(16);
//!     tokio::spawn(async move {
//!         for n in 0..3 {
//!             if tx.send(sse::Event::data(n.to_string()).id(n.to_string())).await.is_err() {
//!                 break; // client went away
//!             }
//!         }
//!     });
//!     events.keep_alive(Duration::from_secs(15))
//! }
//! ```

use std::convert::Infallible;
use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at};

use crate::reply::{IntoReply, Reply};
use crate::response::{ContentType, Response};

/// One server-sent event.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Event {
    data: Option<String>,
    event: Option<String>,
    id: Option<String>,
    retry: Option<Duration>,
    comment: Option<String>,
}

impl Event {
    /// An unnamed event carrying `data`. Multi-line data is split over
    /// several `data:` lines.
    pub fn data(data: impl Into<String>) -> Self {
        Self { data: Some(data.into()), ..Self::default() }
    }

    /// A comment line; clients ignore it.
    pub fn comment(comment: impl Into<String>) -> Self {
        Self { comment: Some(comment.into()), ..Self::default() }
    }

    /// Sets the event name the client dispatches on.
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Reconnection delay the client should use.
    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// The wire framing, terminated by a blank line.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(64);
        if let Some(comment) = &self.comment {
            for line in comment.lines() {
                field(&mut out, "", line);
            }
        }
        if let Some(event) = &self.event {
            field(&mut out, "event", event);
        }
        if let Some(id) = &self.id {
            field(&mut out, "id", id);
        }
        if let Some(retry) = self.retry {
            field(&mut out, "retry", &retry.as_millis().to_string());
        }
        if let Some(data) = &self.data {
            if data.is_empty() {
                field(&mut out, "data", "");
            }
            for line in data.lines() {
                field(&mut out, "data", line);
            }
        }
        out.put_u8(b'\n');
        out.freeze()
    }
}

fn field(out: &mut BytesMut, name: &str, value: &str) {
    out.put_slice(name.as_bytes());
    out.put_slice(b": ");
    out.put_slice(value.as_bytes());
    out.put_u8(b'\n');
}

impl From<&str> for Event {
    fn from(data: &str) -> Self {
        Self::data(data)
    }
}

impl From<String> for Event {
    fn from(data: String) -> Self {
        Self::data(data)
    }
}

/// A `text/event-stream` response.
pub struct Sse {
    events: BoxStream<'static, Event>,
    keep_alive: Option<Duration>,
}

impl Sse {
    pub fn new<S>(events: S) -> Self
    where
        S: Stream<Item = Event> + Send + 'static,
    {
        Self { events: events.boxed(), keep_alive: None }
    }

    /// Sends a `: keep-alive` comment whenever `period` passes, so idle
    /// connections are not closed by intermediaries.
    pub fn keep_alive(mut self, period: Duration) -> Self {
        self.keep_alive = Some(period);
        self
    }

    pub fn into_response(self) -> Response {
        let frames = self.events.map(|event| event.to_bytes());
        let frames: BoxStream<'static, Bytes> = match self.keep_alive {
            Some(period) => with_keep_alive(frames, period),
            None => frames.boxed(),
        };
        Response::builder()
            .header("cache-control", "no-cache")
            .stream(ContentType::EventStream, frames.map(Ok::<_, Infallible>))
    }
}

impl fmt::Debug for Sse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sse").field("keep_alive", &self.keep_alive).finish_non_exhaustive()
    }
}

impl IntoReply for Sse {
    fn into_reply(self) -> Reply {
        Reply::Response(self.into_response())
    }
}

/// Interleaves keep-alive comments with `frames` until `frames` ends.
fn with_keep_alive<S>(frames: S, period: Duration) -> BoxStream<'static, Bytes>
where
    S: Stream<Item = Bytes> + Send + 'static,
{
    let ping = Event::comment("keep-alive").to_bytes();
    let ticks = stream::unfold(interval_at(Instant::now() + period, period), |mut interval| async move {
        interval.tick().await;
        Some(((), interval))
    })
    .map(move |()| Some(ping.clone()));

    let frames = frames.map(Some).chain(stream::once(async { None }));
    stream::select(frames, ticks)
        .take_while(|frame| std::future::ready(frame.is_some()))
        .filter_map(std::future::ready)
        .boxed()
}

/// Sending half of [`channel`].
pub type Sender = mpsc::Sender<Event>;

/// An event stream fed from a channel. The response ends when every
/// sender is dropped; a send fails once the client has disconnected.
pub fn channel(buffer: usize) -> (Sender, Sse) {
    let (tx, mut rx) = mpsc::channel(buffer);
    let events = stream::poll_fn(move |cx| rx.poll_recv(cx));
    (tx, Sse::new(events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_event_framing() {
        let event = Event::data("line one\nline two")
            .event("update")
            .id("7")
            .retry(Duration::from_secs(3));
        assert_eq!(
            event.to_bytes(),
            "event: update\nid: 7\nretry: 3000\ndata: line one\ndata: line two\n\n"
        );
    }

    #[test]
    fn comments_and_empty_data() {
        assert_eq!(Event::comment("ping").to_bytes(), ": ping\n\n");
        assert_eq!(Event::data("").to_bytes(), "data: \n\n");
    }

    #[tokio::test]
    async fn channel_events_arrive_in_order() {
        let (tx, sse) = channel(4);
        tx.send(Event::data("a")).await.unwrap();
        tx.send("b".into()).await.unwrap();
        drop(tx);

        let res = sse.into_response();
        assert_eq!(res.header("content-type"), Some("text/event-stream"));
        assert_eq!(res.header("cache-control"), Some("no-cache"));
        assert_eq!(res.collect().await.unwrap(), "data: a\n\ndata: b\n\n");
    }

    #[tokio::test]
    async fn keep_alive_fills_idle_time_and_stops_with_the_source() {
        let (tx, sse) = channel(4);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            let _ = tx.send(Event::data("done")).await;
        });

        let body = sse.keep_alive(Duration::from_millis(10)).into_response().collect().await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.starts_with(": keep-alive\n\n"), "{body}");
        assert!(body.contains("data: done\n\n"), "{body}");
    }
}
