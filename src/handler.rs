//! Handler trait, delegation, and type erasure.
//!
//! # How async handlers are stored
//!
//! A route holds an ordered list of handlers of *different* types, so each
//! one is hidden behind a trait object (`dyn ErasedHandler`) and stored as a
//! [`BoxedHandler`]:
//!
//! ```text
//! async fn hello(ctx: Context) -> &'static str { … }   ← user writes this
//!        ↓ route::get("/", hello)
//! hello.into_boxed_handler()                           ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                           ← stored once, shared
//!        ↓
//! handler.call(ctx)  at request time                   ← one vtable dispatch
//!        ↓
//! Box::pin(async { hello(ctx).await.into_outcome() })  ← BoxFuture
//! ```
//!
//! # Delegation
//!
//! A handler either answers (any [`IntoReply`] value) or passes the request
//! on with [`Outcome::Next`], usually via [`Context::delegate`] or
//! [`Context::delegate_with`]. The next handler of the route then runs with
//! the (possibly enriched) context.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::reply::{IntoReply, Reply};

// ── Outcome ───────────────────────────────────────────────────────────────────

/// What a handler did with the request.
#[derive(Debug)]
pub enum Outcome {
    /// Answer the request; ends the handler list.
    Reply(Reply),
    /// Run the next handler of the route with this context.
    Next(Context),
}

/// Conversion of a handler's return value into an [`Outcome`].
///
/// Implemented for [`Outcome`], every [`IntoReply`] type, and `Result`s of
/// either; an `Err` is routed to the nearest error handler.
pub trait IntoOutcome: Send {
    fn into_outcome(self) -> Result<Outcome>;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(self)
    }
}

impl<T: IntoReply> IntoOutcome for T {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(Outcome::Reply(self.into_reply()))
    }
}

impl<T, E> IntoOutcome for std::result::Result<T, E>
where
    T: IntoOutcome,
    E: Into<Error> + Send,
{
    fn into_outcome(self) -> Result<Outcome> {
        self.map_err(Into::into)?.into_outcome()
    }
}

// ── Internal types ────────────────────────────────────────────────────────────

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Handler` trait's `into_boxed_handler` method.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<Outcome>>;
}

/// A type-erased handler shared across concurrent requests.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied for any `async fn`
/// with the signature:
///
/// ```text
/// async fn name(ctx: Context) -> impl IntoOutcome
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
    pub trait SealedRescue {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Newtype bridging a concrete handler `F` to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoOutcome + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, Result<Outcome>> {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.into_outcome() })
    }
}

// ── Handler lists ─────────────────────────────────────────────────────────────

/// The ordered handler list of one route.
///
/// Build it with [`chain!`](crate::chain) or [`Handlers::then`]; a single
/// handler converts on its own.
#[derive(Clone, Default)]
pub struct Handlers(pub(crate) Vec<BoxedHandler>);

impl Handlers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a handler that runs when the previous one delegates.
    pub fn then(mut self, handler: impl Handler) -> Self {
        self.0.push(handler.into_boxed_handler());
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Anything that can serve as a route's handler list.
pub trait IntoHandlers {
    fn into_handlers(self) -> Handlers;
}

impl IntoHandlers for Handlers {
    fn into_handlers(self) -> Handlers {
        self
    }
}

impl<H: Handler> IntoHandlers for H {
    fn into_handlers(self) -> Handlers {
        Handlers::new().then(self)
    }
}

/// Builds a [`Handlers`] list from handlers in delegation order.
///
/// ```rust
/// use spindle::{Context, Outcome, chain, route};
///
/// async fn authorize(ctx: Context) -> Outcome { ctx.delegate_with([("role", "admin")]) }
/// async fn show(ctx: Context) -> String { format!("{:?}", ctx.field("role")) }
///
/// let entry = route::get("/admin", chain![authorize, show]);
/// ```
#[macro_export]
macro_rules! chain {
    ($($handler:expr),+ $(,)?) => {
        $crate::Handlers::new()$(.then($handler))+
    };
}

// ── Error handlers ────────────────────────────────────────────────────────────

/// Internal dispatch interface for error handlers.
#[doc(hidden)]
pub trait ErasedRescue {
    fn call(&self, ctx: Context, err: Error) -> BoxFuture<'static, Reply>;
}

#[doc(hidden)]
pub type BoxedRescue = Arc<dyn ErasedRescue + Send + Sync + 'static>;

/// Implemented for every valid error handler:
///
/// ```text
/// async fn name(ctx: Context, err: Error) -> impl IntoReply
/// ```
///
/// The returned value goes through the response coercer like any handler
/// reply.
pub trait Rescue: private::SealedRescue + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_rescue(self) -> BoxedRescue;
}

impl<F, Fut, R> private::SealedRescue for F
where
    F: Fn(Context, Error) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + 'static,
{
}

impl<F, Fut, R> Rescue for F
where
    F: Fn(Context, Error) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + 'static,
{
    fn into_boxed_rescue(self) -> BoxedRescue {
        Arc::new(FnRescue(self))
    }
}

struct FnRescue<F>(F);

impl<F, Fut, R> ErasedRescue for FnRescue<F>
where
    F: Fn(Context, Error) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + 'static,
{
    fn call(&self, ctx: Context, err: Error) -> BoxFuture<'static, Reply> {
        let fut = (self.0)(ctx, err);
        Box::pin(async move { fut.await.into_reply() })
    }
}
