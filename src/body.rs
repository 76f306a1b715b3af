//! Lazily collected request body.

use std::fmt;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::error::{Error, Result};

/// The body of an inbound request.
///
/// Nothing is read from the connection until a handler asks for the bytes.
/// The first call to [`bytes`](RequestBody::bytes) drains the transport and
/// caches the result, so later handlers in a delegation chain see the same
/// content.
pub struct RequestBody {
    state: State,
}

enum State {
    Buffered(Bytes),
    Incoming(Incoming),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self { state: State::Buffered(Bytes::new()) }
    }

    pub(crate) fn incoming(body: Incoming) -> Self {
        Self { state: State::Incoming(body) }
    }

    /// Reads the whole body, collecting it from the connection on first use.
    pub async fn bytes(&mut self) -> Result<Bytes> {
        let bytes = match &mut self.state {
            State::Buffered(bytes) => return Ok(bytes.clone()),
            State::Incoming(incoming) => {
                incoming.collect().await.map_err(Error::handler)?.to_bytes()
            }
        };
        self.state = State::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Reads the whole body as UTF-8 text.
    pub async fn text(&mut self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(Error::handler)
    }

    /// `true` once the body is buffered and holds no bytes.
    pub fn is_empty(&self) -> bool {
        matches!(&self.state, State::Buffered(b) if b.is_empty())
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self { state: State::Buffered(bytes) }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Buffered(b) => f.debug_tuple("RequestBody").field(&b.len()).finish(),
            State::Incoming(_) => f.write_str("RequestBody(<incoming>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buffered_body_reads_repeatedly() {
        let mut body = RequestBody::from("name=alice");
        assert_eq!(body.text().await.unwrap(), "name=alice");
        assert_eq!(body.bytes().await.unwrap(), Bytes::from_static(b"name=alice"));
        assert!(!body.is_empty());
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_handler_error() {
        let mut body = RequestBody::from(vec![0xff, 0xfe]);
        let err = body.text().await.unwrap_err();
        assert_eq!(err.kind(), "handler");
    }
}
