//! Interceptors and the continuation chain.
//!
//! An interceptor wraps the rest of a route's processing: it receives the
//! context, the [`Kind`] of the matched target, and a [`Next`] continuation.
//! Code before `next.run(ctx)` is pre-logic, code after it is post-logic.
//! Not calling `next.run` short-circuits everything downstream.
//!
//! The chain is built by folding the in-scope interceptors right to left
//! around the innermost continuation (the route's handler list):
//!
//! ```text
//! declared:   [a, b]  around  handlers
//! built:      a( b( handlers ) )
//! runs:       a.pre → b.pre → handlers → b.post → a.post
//! ```
//!
//! `Next::run` takes `self`, so a continuation can be resumed at most once.
//!
//! Every layer remembers the error handler that was in scope where it was
//! declared. A failure is answered at the layer that raised it, so the
//! interceptors outside that handler see an ordinary response in their
//! post-logic.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, error};

use crate::body::RequestBody;
use crate::context::{Context, RequestHead};
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, BoxedRescue, Outcome};
use crate::reply::coerce;
use crate::response::Response;
use crate::session::Session;

/// What the dispatcher matched for this request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// A declared method route.
    Route,
    /// An `OPTIONS` request on a path that only has routes for other
    /// methods; answered automatically unless an interceptor intervenes.
    Preflight,
    /// A file under an asset mount.
    Asset,
}

// ── Next ──────────────────────────────────────────────────────────────────────

type Continuation = Box<dyn FnOnce(Context) -> BoxFuture<'static, Result<Response>> + Send>;

/// The remainder of the chain, handed to an interceptor.
pub struct Next {
    run: Continuation,
}

impl Next {
    fn new<F>(run: F) -> Self
    where
        F: FnOnce(Context) -> BoxFuture<'static, Result<Response>> + Send + 'static,
    {
        Self { run: Box::new(run) }
    }

    /// Runs everything downstream and returns its response.
    pub async fn run(self, ctx: Context) -> Result<Response> {
        (self.run)(ctx).await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(..)")
    }
}

// ── Interceptor trait ─────────────────────────────────────────────────────────

/// Internal dispatch interface; see [`crate::handler::ErasedHandler`].
#[doc(hidden)]
pub trait ErasedInterceptor {
    fn call(&self, ctx: Context, kind: Kind, next: Next) -> BoxFuture<'static, Result<Response>>;
}

#[doc(hidden)]
pub type BoxedInterceptor = Arc<dyn ErasedInterceptor + Send + Sync + 'static>;

/// Implemented for every valid interceptor.
///
/// Satisfied by any `async fn` with the signature:
///
/// ```text
/// async fn name(ctx: Context, kind: Kind, next: Next) -> Result<Response, Error>
/// ```
///
/// and by the built-in interceptors in [`crate::middleware`].
pub trait Interceptor: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_interceptor(self) -> BoxedInterceptor;
}

pub(crate) mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Context, Kind, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
}

impl<F, Fut> Interceptor for F
where
    F: Fn(Context, Kind, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn into_boxed_interceptor(self) -> BoxedInterceptor {
        Arc::new(FnInterceptor(self))
    }
}

struct FnInterceptor<F>(F);

impl<F, Fut> ErasedInterceptor for FnInterceptor<F>
where
    F: Fn(Context, Kind, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn call(&self, ctx: Context, kind: Kind, next: Next) -> BoxFuture<'static, Result<Response>> {
        Box::pin((self.0)(ctx, kind, next))
    }
}

// ── Chain ─────────────────────────────────────────────────────────────────────

/// One interceptor and the error handler enclosing it.
#[derive(Clone)]
pub(crate) struct Layer {
    interceptor: BoxedInterceptor,
    rescue: Option<BoxedRescue>,
}

impl Layer {
    pub(crate) fn new(interceptor: BoxedInterceptor, rescue: Option<BoxedRescue>) -> Self {
        Self { interceptor, rescue }
    }
}

/// Interceptors in declaration order around one handler list.
#[derive(Clone)]
pub(crate) struct Chain {
    layers: Arc<[Layer]>,
    handlers: Arc<[BoxedHandler]>,
    rescue: Option<BoxedRescue>,
    kind: Kind,
}

impl Chain {
    /// `rescue` answers failures of the handler list itself.
    pub(crate) fn new(
        layers: Vec<Layer>,
        handlers: Vec<BoxedHandler>,
        rescue: Option<BoxedRescue>,
        kind: Kind,
    ) -> Self {
        Self { layers: layers.into(), handlers: handlers.into(), rescue, kind }
    }

    pub(crate) fn kind(&self) -> Kind {
        self.kind
    }

    /// The error handler nearest to the handlers.
    pub(crate) fn rescue(&self) -> Option<&BoxedRescue> {
        self.rescue.as_ref()
    }

    /// Folds the interceptors around the handler list and runs the result.
    ///
    /// An `Err` means no error handler enclosed the failure, or the last
    /// handler delegated.
    pub(crate) async fn run(&self, ctx: Context) -> Result<Response> {
        let handlers = Arc::clone(&self.handlers);
        let rescue = self.rescue.clone();
        let innermost = Next::new(move |ctx| {
            Box::pin(guarded(rescue, ctx, move |ctx| run_handlers(handlers, ctx)))
        });

        let kind = self.kind;
        let outermost = self.layers.iter().rev().fold(innermost, |next, layer| {
            let Layer { interceptor, rescue } = layer.clone();
            Next::new(move |ctx| {
                Box::pin(guarded(rescue, ctx, move |ctx| interceptor.call(ctx, kind, next)))
            })
        });
        outermost.run(ctx).await
    }
}

/// Runs one layer and answers its failure with `rescue`, if there is one.
async fn guarded<F, Fut>(rescue: Option<BoxedRescue>, ctx: Context, run: F) -> Result<Response>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<Response>>,
{
    let Some(rescue) = rescue else {
        return run(ctx).await;
    };
    let head = ctx.shared_head();
    let session = ctx.session().cloned();
    match run(ctx).await {
        Err(Error::UnhandledDelegation { path }) => Err(Error::UnhandledDelegation { path }),
        Err(err) => Ok(recover(&rescue, head, session, err).await),
        ok => ok,
    }
}

/// Answers `err` with an error handler. The handler gets a fresh context over
/// the same head and session; a reply that cannot be coerced becomes `500`.
pub(crate) async fn recover(
    rescue: &BoxedRescue,
    head: Arc<RequestHead>,
    session: Option<Session>,
    err: Error,
) -> Response {
    error!(
        method = %head.method(),
        path = head.path(),
        error = %err,
        kind = err.kind(),
        "request failed"
    );
    let ctx = Context::new(head, RequestBody::empty(), session);
    match coerce(rescue.call(ctx, err).await).await {
        Ok(res) => res,
        Err(err) => {
            error!(error = %err, kind = err.kind(), "error handler reply could not be coerced");
            Response::internal_error()
        }
    }
}

/// Runs handlers in order until one answers.
async fn run_handlers(handlers: Arc<[BoxedHandler]>, ctx: Context) -> Result<Response> {
    let mut ctx = ctx;
    for (position, handler) in handlers.iter().enumerate() {
        match handler.call(ctx).await? {
            Outcome::Reply(reply) => return coerce(reply).await,
            Outcome::Next(next) => {
                debug!(path = next.path(), position, "handler delegated");
                ctx = next;
            }
        }
    }
    Err(Error::UnhandledDelegation { path: ctx.path().to_owned() })
}
