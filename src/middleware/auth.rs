//! Authentication mounts.
//!
//! An [`auth`](crate::route::auth) entry runs its [`AuthBackend`] before
//! every request under it and stores the result in the context's identity
//! slot. The backend only answers "who is this?"; whether an anonymous
//! request may proceed is left to the handlers and interceptors below.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::context::{Context, Fields, RequestHead};
use crate::error::Result;
use crate::interceptor::{BoxedInterceptor, ErasedInterceptor, Kind, Next};
use crate::response::Response;

/// An authenticated principal.
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    subject: String,
    claims: Fields,
}

impl Identity {
    pub fn new(subject: impl Into<String>) -> Self {
        Self { subject: subject.into(), claims: Fields::new() }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }
}

/// Resolves the caller of a request.
///
/// Return `Ok(None)` for anonymous requests; an `Err` is treated like a
/// handler failure and goes to the nearest error handler.
#[async_trait]
pub trait AuthBackend: Send + Sync + 'static {
    async fn authenticate(&self, head: &RequestHead) -> Result<Option<Identity>>;
}

/// The token of an `authorization: Bearer <token>` header.
pub fn bearer_token(head: &RequestHead) -> Option<&str> {
    let value = head.header("authorization")?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// The interceptor an auth mount compiles to.
pub(crate) struct Authenticate {
    backend: Arc<dyn AuthBackend>,
}

impl Authenticate {
    pub(crate) fn boxed(backend: Arc<dyn AuthBackend>) -> BoxedInterceptor {
        Arc::new(Self { backend })
    }
}

impl ErasedInterceptor for Authenticate {
    fn call(&self, ctx: Context, _kind: Kind, next: Next) -> BoxFuture<'static, Result<Response>> {
        let backend = Arc::clone(&self.backend);
        Box::pin(async move {
            let mut ctx = ctx;
            let head = ctx.shared_head();
            let identity = backend.authenticate(&head).await?;
            debug!(subject = identity.as_ref().map(Identity::subject), "request authenticated");
            ctx.set_identity(identity);
            next.run(ctx).await
        })
    }
}
