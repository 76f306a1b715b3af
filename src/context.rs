//! Per-request context threaded through a handler chain.
//!
//! The request head (method, path, headers, route params) is frozen when the
//! dispatcher builds the context and shared behind an `Arc`; handlers only
//! ever see it through `&` accessors. What a handler may change is the
//! extension fields, the identity slot, and the session.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderMap;
use serde_json::{Map, Value};

use crate::body::RequestBody;
use crate::error::Result;
use crate::handler::Outcome;
use crate::method::Method;
use crate::middleware::auth::Identity;
use crate::session::Session;

/// Extension fields merged into a [`Context`] by delegating handlers.
pub type Fields = Map<String, Value>;

/// Named route parameters bound during matching.
pub type Params = HashMap<String, String>;

/// The immutable part of a request.
#[derive(Debug)]
pub struct RequestHead {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    params: Params,
    pattern: Option<Arc<str>>,
}

impl RequestHead {
    pub(crate) fn new(
        method: Method,
        uri: &http::Uri,
        headers: HeaderMap,
        params: Params,
        pattern: Option<Arc<str>>,
    ) -> Self {
        Self {
            method,
            path: uri.path().to_owned(),
            query: uri.query().map(str::to_owned),
            headers,
            params,
            pattern,
        }
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn query(&self) -> Option<&str> { self.query.as_deref() }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn params(&self) -> &Params { &self.params }

    /// The route pattern that matched, e.g. `/users/{id}`.
    pub fn pattern(&self) -> Option<&str> { self.pattern.as_deref() }

    /// Case-insensitive header lookup. Values that are not valid UTF-8 are
    /// treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Everything a handler knows about the request it is answering.
pub struct Context {
    head: Arc<RequestHead>,
    body: RequestBody,
    session: Option<Session>,
    identity: Option<Identity>,
    fields: Fields,
}

impl Context {
    pub(crate) fn new(head: Arc<RequestHead>, body: RequestBody, session: Option<Session>) -> Self {
        Self { head, body, session, identity: None, fields: Fields::new() }
    }

    pub fn head(&self) -> &RequestHead { &self.head }
    pub fn method(&self) -> Method { self.head.method }
    pub fn path(&self) -> &str { &self.head.path }
    pub fn query(&self) -> Option<&str> { self.head.query() }
    pub fn headers(&self) -> &HeaderMap { &self.head.headers }
    pub fn header(&self, name: &str) -> Option<&str> { self.head.header(name) }
    pub fn param(&self, key: &str) -> Option<&str> { self.head.param(key) }
    pub fn params(&self) -> &Params { &self.head.params }

    pub(crate) fn shared_head(&self) -> Arc<RequestHead> {
        Arc::clone(&self.head)
    }

    /// Reads the request body, collecting it from the connection on first use.
    pub async fn body(&mut self) -> Result<Bytes> {
        self.body.bytes().await
    }

    pub async fn text(&mut self) -> Result<String> {
        self.body.text().await
    }

    /// The client's session, when the dispatcher runs with a session store.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: Option<Identity>) {
        self.identity = identity;
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn insert_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Merges `fields` into the context; incoming keys win on conflict.
    pub fn merge<I, K, V>(&mut self, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.fields.extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
    }

    /// Hands the request to the next handler of the route unchanged.
    pub fn delegate(self) -> Outcome {
        Outcome::Next(self)
    }

    /// Merges `fields`, then hands the request to the next handler.
    ///
    /// ```rust
    /// use spindle::{Context, Outcome};
    ///
    /// async fn load_user(ctx: Context) -> Outcome {
    ///     let id = ctx.param("id").unwrap_or_default().to_owned();
    ///     ctx.delegate_with([("user", id)])
    /// }
    /// ```
    pub fn delegate_with<I, K, V>(mut self, fields: I) -> Outcome
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.merge(fields);
        Outcome::Next(self)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.head.method)
            .field("path", &self.head.path)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_context(method: Method, uri: &str, headers: HeaderMap) -> Context {
    let uri: http::Uri = uri.parse().unwrap();
    let head = RequestHead::new(method, &uri, headers, Params::new(), None);
    Context::new(Arc::new(head), RequestBody::empty(), None)
}
