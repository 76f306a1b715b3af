//! Request dispatch.
//!
//! One request moves through these states:
//!
//! ```text
//! matching ──miss──────────────────────────────▶ done (404)
//!    │
//!    └─match─▶ executing ──ok──────────────────▶ done
//!                  │
//!                  └─err─▶ erroring ──rescue───▶ done (error handler reply)
//!                                   └─none─────▶ done (500)
//! ```
//!
//! The error handler is the one enclosing the layer that failed: a handler
//! failure goes to the rescue nearest the route, an interceptor failure to
//! the rescue around that interceptor.
//!
//! A route whose last handler delegates is a bug in the route declaration:
//! nothing can answer, so [`Dispatcher::handle`] returns the error and the
//! server aborts the connection.

use std::sync::Arc;

use tracing::{debug, error};

use crate::body::RequestBody;
use crate::context::{Context, Params, RequestHead};
use crate::error::{Error, Result};
use crate::handler::Outcome;
use crate::interceptor::recover;
use crate::method::Method;
use crate::reply::coerce;
use crate::response::Response;
use crate::router::Router;
use crate::session::{SessionConfig, SessionLayer, SessionStore};

/// Routes requests through a compiled [`Router`].
///
/// Cheap to clone; the router and session layer are shared.
#[derive(Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    sessions: Option<Arc<SessionLayer>>,
}

impl Dispatcher {
    pub fn new(router: Router) -> Self {
        Self { router: Arc::new(router), sessions: None }
    }

    /// Loads a session for every matched request from `store`, keyed by the
    /// cookie described in `config`.
    pub fn with_sessions(mut self, store: impl SessionStore, config: SessionConfig) -> Self {
        self.sessions = Some(Arc::new(SessionLayer::new(Arc::new(store), config)));
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Answers one request.
    ///
    /// Handler, interceptor, and coercion failures never surface here: they
    /// are answered by the nearest error handler or a generic `500`. The only
    /// `Err` is [`Error::UnhandledDelegation`].
    pub async fn handle(&self, req: http::Request<RequestBody>) -> Result<Response> {
        let (parts, body) = req.into_parts();
        let Ok(method) = Method::try_from(&parts.method) else {
            let err = Error::NotFound { method: parts.method.to_string(), path: parts.uri.path().to_owned() };
            debug!(error = %err, "unsupported method");
            return Ok(Response::not_found());
        };

        let (endpoint, params) = match self.router.lookup(method, parts.uri.path()) {
            Ok(found) => found,
            Err(err) => {
                debug!(error = %err, kind = err.kind(), "no route");
                let head = RequestHead::new(method, &parts.uri, parts.headers, Params::new(), None);
                return Ok(self.not_found(head, body).await);
            }
        };

        let pattern = Some(Arc::clone(&endpoint.pattern));
        let head = Arc::new(RequestHead::new(method, &parts.uri, parts.headers, params, pattern));
        debug!(%method, path = head.path(), route = %endpoint.pattern, "route matched");

        let chain = endpoint.chain_for(&head);
        let session = match &self.sessions {
            Some(layer) => match layer.load(head.headers()).await {
                Ok(session) => Some(session),
                Err(err) => {
                    let res = match chain.rescue() {
                        Some(rescue) => recover(rescue, head, None, err).await,
                        None => unrescued(&head, &err),
                    };
                    return Ok(res);
                }
            },
            None => None,
        };

        let ctx = Context::new(Arc::clone(&head), body, session.clone());
        let mut res = match chain.run(ctx).await {
            Ok(res) => res,
            Err(err @ Error::UnhandledDelegation { .. }) => {
                error!(%method, path = head.path(), error = %err, "no handler answered");
                return Err(err);
            }
            Err(err) => unrescued(&head, &err),
        };

        if let (Some(layer), Some(session)) = (&self.sessions, &session) {
            layer.finish(session, &mut res).await;
        }
        Ok(res)
    }

    async fn not_found(&self, head: RequestHead, body: RequestBody) -> Response {
        let Some(handler) = self.router.not_found_handler() else {
            return Response::not_found();
        };
        let ctx = Context::new(Arc::new(head), body, None);
        let reply = match handler.call(ctx).await {
            Ok(Outcome::Reply(reply)) => reply,
            Ok(Outcome::Next(_)) => return Response::not_found(),
            Err(err) => {
                error!(error = %err, kind = err.kind(), "not-found handler failed");
                return Response::not_found();
            }
        };
        coerce(reply).await.unwrap_or_else(|err| {
            error!(error = %err, kind = err.kind(), "not-found handler reply could not be coerced");
            Response::not_found()
        })
    }
}

impl From<Router> for Dispatcher {
    fn from(router: Router) -> Self {
        Self::new(router)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .field("sessions", &self.sessions.is_some())
            .finish()
    }
}

/// A failure no error handler encloses.
fn unrescued(head: &RequestHead, err: &Error) -> Response {
    error!(
        method = %head.method(),
        path = head.path(),
        error = %err,
        kind = err.kind(),
        "request failed"
    );
    Response::internal_error()
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::reply::Reply;
    use crate::route;

    fn request(method: http::Method, uri: &str) -> http::Request<RequestBody> {
        http::Request::builder().method(method).uri(uri).body(RequestBody::empty()).unwrap()
    }

    async fn hello(_ctx: Context) -> &'static str {
        "hello"
    }

    #[tokio::test]
    async fn unknown_methods_are_not_found() {
        let dispatcher = Dispatcher::new(Router::new(vec![route::get("/", hello)]).unwrap());
        let purge = http::Method::from_bytes(b"PURGE").unwrap();
        let res = dispatcher.handle(request(purge, "/")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn custom_not_found_handler_answers_misses() {
        let router = Router::new(vec![route::get("/", hello)])
            .unwrap()
            .not_found(|ctx: Context| async move {
                Response::builder().status(StatusCode::NOT_FOUND).text(format!("nothing at {}", ctx.path()))
            });
        let dispatcher = Dispatcher::from(router);
        let res = dispatcher.handle(request(http::Method::GET, "/missing")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(res.collect().await.unwrap(), "nothing at /missing");
    }

    #[tokio::test]
    async fn failing_error_handler_falls_back_to_500() {
        let failing = |_ctx: Context| async { Err::<String, _>(Error::handler("boom")) };
        let bad_rescue = |_ctx: Context, _err: Error| async { Reply::opaque(42_u32) };
        let router = Router::new(vec![route::rescue(bad_rescue, vec![route::get("/", failing)])]).unwrap();
        let res = Dispatcher::new(router).handle(request(http::Method::GET, "/")).await.unwrap();
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
