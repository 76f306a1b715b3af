//! Cross-origin resource sharing.
//!
//! [`Cors`] is an interceptor. Declare it around the routes that browsers
//! call from other origins:
//!
//! ```rust
//! use std::time::Duration;
//! use spindle::middleware::Cors;
//! use spindle::{Context, route};
//!
//! async fn list(_ctx: Context) -> &'static str { "[]" }
//!
//! let api = route::intercept(
//!     Cors::any().allow_headers(["content-type"]).max_age(Duration::from_secs(600)),
//!     vec![route::get("/items", list)],
//! );
//! ```
//!
//! Preflight requests (`OPTIONS` with `origin` and
//! `access-control-request-method`) are answered here with `200` and an empty
//! body. When the origin is not allowed the answer carries no CORS headers,
//! which is how browsers learn the request is refused.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use tracing::debug;

use crate::context::Context;
use crate::error::Result;
use crate::interceptor::{BoxedInterceptor, ErasedInterceptor, Interceptor, Kind, Next, private};
use crate::method::Method;
use crate::response::Response;

#[derive(Clone, Debug)]
enum Origins {
    Any,
    List(Vec<String>),
}

/// CORS policy.
#[derive(Clone, Debug)]
pub struct Cors {
    origins: Origins,
    methods: Vec<Method>,
    headers: Vec<String>,
    expose: Vec<String>,
    max_age: Option<Duration>,
    credentials: bool,
}

impl Cors {
    /// Allows every origin.
    pub fn any() -> Self {
        Self::with_origins(Origins::Any)
    }

    /// Allows only the listed origins (exact match, e.g. `https://app.example`).
    pub fn origins<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_origins(Origins::List(origins.into_iter().map(Into::into).collect()))
    }

    fn with_origins(origins: Origins) -> Self {
        Self {
            origins,
            methods: vec![Method::Get, Method::Head, Method::Post, Method::Put, Method::Patch, Method::Delete],
            headers: Vec::new(),
            expose: Vec::new(),
            max_age: None,
            credentials: false,
        }
    }

    pub fn allow_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Sends `access-control-allow-credentials: true`. The allowed origin is
    /// then echoed back instead of `*`.
    pub fn allow_credentials(mut self) -> Self {
        self.credentials = true;
        self
    }

    fn allows(&self, origin: &str) -> bool {
        match &self.origins {
            Origins::Any => true,
            Origins::List(list) => list.iter().any(|o| o == origin),
        }
    }

    fn allow_origin(&self, origin: &str, headers: &mut HeaderMap) {
        let value = match (&self.origins, self.credentials) {
            (Origins::Any, false) => HeaderValue::from_static("*"),
            _ => match HeaderValue::from_str(origin) {
                Ok(value) => value,
                Err(_) => return,
            },
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
        if !matches!(self.origins, Origins::Any) || self.credentials {
            headers.append(header::VARY, HeaderValue::from_static("origin"));
        }
        if self.credentials {
            headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
    }

    fn preflight(&self, origin: &str) -> Response {
        let mut res = Response::status(StatusCode::OK);
        if !self.allows(origin) {
            debug!(origin, "preflight from disallowed origin");
            return res;
        }
        let headers = res.headers_mut();
        self.allow_origin(origin, headers);
        let methods = self.methods.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
        insert_list(headers, header::ACCESS_CONTROL_ALLOW_METHODS, &methods);
        insert_list(headers, header::ACCESS_CONTROL_ALLOW_HEADERS, &self.headers.join(", "));
        if let Some(max_age) = self.max_age {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age.as_secs()));
        }
        res
    }
}

fn insert_list(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if value.is_empty() {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

impl ErasedInterceptor for Cors {
    fn call(&self, ctx: Context, kind: Kind, next: Next) -> BoxFuture<'static, Result<Response>> {
        let policy = self.clone();
        Box::pin(async move {
            let Some(origin) = ctx.header("origin").map(str::to_owned) else {
                return next.run(ctx).await;
            };
            let is_preflight = kind == Kind::Preflight
                && ctx.headers().contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
            if is_preflight {
                return Ok(policy.preflight(&origin));
            }

            let mut res = next.run(ctx).await?;
            if policy.allows(&origin) {
                let headers = res.headers_mut();
                policy.allow_origin(&origin, headers);
                insert_list(headers, header::ACCESS_CONTROL_EXPOSE_HEADERS, &policy.expose.join(", "));
            }
            Ok(res)
        })
    }
}

impl private::Sealed for Cors {}

impl Interceptor for Cors {
    fn into_boxed_interceptor(self) -> BoxedInterceptor {
        Arc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_context;
    use crate::handler::Handler;
    use crate::interceptor::{Chain, Layer};

    fn preflight_headers(origin: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("origin", origin.parse().unwrap());
        headers.insert("access-control-request-method", "POST".parse().unwrap());
        headers
    }

    async fn run(cors: Cors, kind: Kind, headers: HeaderMap) -> Response {
        let handler = |_ctx: Context| async { "payload" };
        let chain = Chain::new(
            vec![Layer::new(cors.into_boxed_interceptor(), None)],
            vec![handler.into_boxed_handler()],
            None,
            kind,
        );
        let method = if kind == Kind::Preflight { Method::Options } else { Method::Get };
        chain.run(test_context(method, "/items", headers)).await.unwrap()
    }

    #[tokio::test]
    async fn wildcard_preflight_reflects_configuration() {
        let cors = Cors::any()
            .allow_headers(["content-type", "x-token"])
            .max_age(Duration::from_secs(600));
        let res = run(cors, Kind::Preflight, preflight_headers("https://app.example")).await;

        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
        assert_eq!(res.header("access-control-allow-headers"), Some("content-type, x-token"));
        assert_eq!(res.header("access-control-max-age"), Some("600"));
        assert!(res.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn restricted_preflight_from_other_origin_has_no_cors_headers() {
        let cors = Cors::origins(["https://app.example"]).allow_headers(["content-type"]);
        let res = run(cors, Kind::Preflight, preflight_headers("https://evil.example")).await;

        assert_eq!(res.status_code(), StatusCode::OK);
        assert!(res.headers().keys().all(|k| !k.as_str().starts_with("access-control-")));
        assert!(res.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn simple_requests_get_the_origin_echoed() {
        let cors = Cors::origins(["https://app.example"]).expose_headers(["x-total"]);
        let mut headers = HeaderMap::new();
        headers.insert("origin", "https://app.example".parse().unwrap());
        let res = run(cors, Kind::Route, headers).await;

        assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));
        assert_eq!(res.header("access-control-expose-headers"), Some("x-total"));
        assert_eq!(res.header("vary"), Some("origin"));
        assert_eq!(res.collect().await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn requests_without_origin_pass_through() {
        let res = run(Cors::any(), Kind::Route, HeaderMap::new()).await;
        assert!(res.header("access-control-allow-origin").is_none());
        assert_eq!(res.collect().await.unwrap(), "payload");
    }
}
