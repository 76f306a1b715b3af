//! Declarative route tree.
//!
//! An application is a `Vec<Entry>` built from the constructors in this
//! module and compiled once by [`Router::new`](crate::Router::new):
//!
//! ```rust
//! use spindle::{Context, Error, Router, middleware, route};
//!
//! async fn list(_ctx: Context) -> &'static str { "[]" }
//! async fn show(ctx: Context) -> String { format!("user {}", ctx.param("id").unwrap_or("?")) }
//! async fn oops(_ctx: Context, err: Error) -> String { format!("api error: {err}") }
//!
//! let router = Router::new(vec![
//!     route::intercept(middleware::trace, vec![
//!         route::prefix("/api", vec![
//!             route::rescue(oops, vec![
//!                 route::get("/users", list),
//!                 route::get("/users/:id", show),
//!             ]),
//!         ]),
//!     ]),
//!     route::assets("/static", "./public"),
//! ]).unwrap();
//! ```
//!
//! Nesting is lexical: an interceptor, error handler, or auth backend
//! applies to every entry below it and to nothing else.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::handler::{BoxedRescue, Handlers, IntoHandlers, Rescue};
use crate::interceptor::{BoxedInterceptor, Interceptor};
use crate::method::Method;
use crate::middleware::AuthBackend;

/// One node of the route tree.
pub enum Entry {
    /// A method route with its ordered handler list.
    Route { method: Method, pattern: String, handlers: Handlers },
    /// Children matched below a path prefix.
    Prefix { segment: String, children: Vec<Entry> },
    /// Children wrapped by an interceptor.
    Intercept { interceptor: BoxedInterceptor, children: Vec<Entry> },
    /// Children whose failures go to this error handler.
    Rescue { handler: BoxedRescue, children: Vec<Entry> },
    /// Files under `dir` served below `segment`.
    Assets { segment: String, dir: PathBuf },
    /// Children authenticated by a backend.
    Auth { backend: Arc<dyn AuthBackend>, children: Vec<Entry> },
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route { method, pattern, handlers } => f
                .debug_struct("Route")
                .field("method", method)
                .field("pattern", pattern)
                .field("handlers", &handlers.len())
                .finish(),
            Self::Prefix { segment, children } => {
                f.debug_struct("Prefix").field("segment", segment).field("children", children).finish()
            }
            Self::Intercept { children, .. } => f.debug_struct("Intercept").field("children", children).finish(),
            Self::Rescue { children, .. } => f.debug_struct("Rescue").field("children", children).finish(),
            Self::Assets { segment, dir } => {
                f.debug_struct("Assets").field("segment", segment).field("dir", dir).finish()
            }
            Self::Auth { children, .. } => f.debug_struct("Auth").field("children", children).finish(),
        }
    }
}

/// A route for `method` at `pattern`.
///
/// Patterns are absolute paths; `:name` matches one non-empty segment and
/// binds it as a route parameter.
pub fn on(method: Method, pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    Entry::Route { method, pattern: pattern.into(), handlers: handlers.into_handlers() }
}

pub fn get(pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    on(Method::Get, pattern, handlers)
}

pub fn post(pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    on(Method::Post, pattern, handlers)
}

pub fn put(pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    on(Method::Put, pattern, handlers)
}

pub fn patch(pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    on(Method::Patch, pattern, handlers)
}

pub fn delete(pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    on(Method::Delete, pattern, handlers)
}

pub fn head(pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    on(Method::Head, pattern, handlers)
}

/// An explicit `OPTIONS` route; takes precedence over the automatic
/// preflight answer.
pub fn options(pattern: impl Into<String>, handlers: impl IntoHandlers) -> Entry {
    on(Method::Options, pattern, handlers)
}

/// The same handler list under several methods.
pub fn any_of(
    methods: impl IntoIterator<Item = Method>,
    pattern: impl Into<String>,
    handlers: impl IntoHandlers,
) -> Entry {
    let pattern = pattern.into();
    let handlers = handlers.into_handlers();
    let children = methods
        .into_iter()
        .map(|method| on(method, pattern.clone(), handlers.clone()))
        .collect();
    Entry::Prefix { segment: String::new(), children }
}

pub fn prefix(segment: impl Into<String>, children: Vec<Entry>) -> Entry {
    Entry::Prefix { segment: segment.into(), children }
}

pub fn intercept(interceptor: impl Interceptor, children: Vec<Entry>) -> Entry {
    Entry::Intercept { interceptor: interceptor.into_boxed_interceptor(), children }
}

/// Scopes an error handler. A failure is answered by the innermost `rescue`
/// around the handler or interceptor that raised it.
pub fn rescue(handler: impl Rescue, children: Vec<Entry>) -> Entry {
    Entry::Rescue { handler: handler.into_boxed_rescue(), children }
}

/// Serves files below `dir` at `segment/*`. Requests that try to leave
/// `dir` get a 404.
pub fn assets(segment: impl Into<String>, dir: impl Into<PathBuf>) -> Entry {
    Entry::Assets { segment: segment.into(), dir: dir.into() }
}

pub fn auth(backend: impl AuthBackend, children: Vec<Entry>) -> Entry {
    Entry::Auth { backend: Arc::new(backend), children }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    async fn ok(_ctx: Context) -> &'static str {
        "ok"
    }

    #[test]
    fn any_of_expands_to_one_route_per_method() {
        let entry = any_of([Method::Get, Method::Post], "/form", ok);
        let Entry::Prefix { segment, children } = entry else { panic!("expected a prefix group") };
        assert!(segment.is_empty());
        let methods: Vec<_> = children
            .iter()
            .map(|c| match c {
                Entry::Route { method, pattern, .. } => (*method, pattern.as_str()),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(methods, vec![(Method::Get, "/form"), (Method::Post, "/form")]);
    }

    #[test]
    fn debug_hides_handlers() {
        let entry = prefix("/api", vec![get("/x", ok)]);
        let printed = format!("{entry:?}");
        assert!(printed.contains("\"/api\""));
        assert!(printed.contains("handlers: 1"));
    }
}
