//! Route tree compilation and lookup.
//!
//! [`Router::new`] walks the declared [`Entry`] tree once, joins prefixes,
//! and inserts every route into a radix tree for its method. Each leaf keeps
//! the interceptor stack that was in scope where it was declared, every
//! interceptor paired with its own enclosing error handler, so a lookup is
//! O(path-length) and needs no further tree walking.

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use matchit::Router as MatchitRouter;
use tracing::{debug, warn};

use crate::context::{Context, Params, RequestHead};
use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, BoxedRescue, Handler};
use crate::interceptor::{BoxedInterceptor, Chain, Kind, Layer};
use crate::method::Method;
use crate::middleware::auth::Authenticate;
use crate::response::{ContentType, Response};
use crate::route::Entry;

const ASSET_PARAM: &str = "asset_path";

/// A compiled route.
pub(crate) struct Endpoint {
    pub(crate) pattern: Arc<str>,
    pub(crate) chain: Chain,
    /// Automatic `OPTIONS` answers only: the chain of each declared method.
    preflights: Vec<(Method, Chain)>,
}

impl Endpoint {
    fn new(pattern: &str, chain: Chain) -> Self {
        Self { pattern: Arc::from(pattern), chain, preflights: Vec::new() }
    }

    /// The chain that answers this request. A preflight runs in the scope of
    /// the route named by `access-control-request-method`, falling back to
    /// the first route declared on the path.
    pub(crate) fn chain_for(&self, head: &RequestHead) -> &Chain {
        head.header("access-control-request-method")
            .and_then(|name| name.parse::<Method>().ok())
            .and_then(|method| self.preflights.iter().find(|(m, _)| *m == method))
            .map_or(&self.chain, |(_, chain)| chain)
    }
}

/// What is in effect at one point of the route tree.
#[derive(Clone, Default)]
struct Scope {
    prefix: String,
    layers: Vec<Layer>,
    rescue: Option<BoxedRescue>,
}

impl Scope {
    fn intercepted_by(&self, interceptor: BoxedInterceptor) -> Self {
        let mut inner = self.clone();
        inner.layers.push(Layer::new(interceptor, self.rescue.clone()));
        inner
    }

    fn chain(&self, handlers: Vec<BoxedHandler>, kind: Kind) -> Chain {
        Chain::new(self.layers.clone(), handlers, self.rescue.clone(), kind)
    }
}

/// Methods declared on one path, in declaration order, each with its scope.
struct PreflightPath {
    pattern: String,
    methods: Vec<(Method, Scope)>,
}

/// The compiled application router.
///
/// One radix tree per method. Build it once at startup and hand it to a
/// [`Dispatcher`](crate::Dispatcher) or [`Server::serve`](crate::Server::serve).
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Arc<Endpoint>>>,
    preflight: MatchitRouter<Arc<Endpoint>>,
    not_found: Option<BoxedHandler>,
}

impl Router {
    /// Compiles a route tree.
    ///
    /// Fails with [`Error::Route`] on malformed patterns, repeated parameter
    /// names, routes without handlers, or two routes claiming the same method
    /// and path.
    pub fn new(entries: Vec<Entry>) -> Result<Self> {
        let mut builder = Builder::default();
        builder.collect(entries, &Scope::default())?;
        builder.finish()
    }

    /// Replaces the default `404 not found` answer for unmatched requests.
    ///
    /// The handler runs outside every scope: no interceptors and no error
    /// handler. If it delegates or fails the default answer is sent.
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = Some(handler.into_boxed_handler());
        self
    }

    pub(crate) fn not_found_handler(&self) -> Option<&BoxedHandler> {
        self.not_found.as_ref()
    }

    /// Finds the endpoint for a request.
    ///
    /// `HEAD` falls back to the `GET` route. `OPTIONS` on a path that only
    /// has routes for other methods yields its preflight endpoint.
    pub(crate) fn lookup(&self, method: Method, path: &str) -> Result<(Arc<Endpoint>, Params)> {
        let found = find(self.routes.get(&method), path).or_else(|| match method {
            Method::Head => find(self.routes.get(&Method::Get), path),
            Method::Options => find(Some(&self.preflight), path),
            _ => None,
        });
        found.ok_or_else(|| Error::NotFound { method: method.to_string(), path: path.to_owned() })
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("methods", &self.routes.keys().collect::<Vec<_>>())
            .field("not_found", &self.not_found.is_some())
            .finish_non_exhaustive()
    }
}

fn find(tree: Option<&MatchitRouter<Arc<Endpoint>>>, path: &str) -> Option<(Arc<Endpoint>, Params)> {
    let matched = tree?.at(path).ok()?;
    let endpoint = Arc::clone(matched.value);
    let params = matched.params.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect();
    Some((endpoint, params))
}

// ── Compilation ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Builder {
    routes: HashMap<Method, MatchitRouter<Arc<Endpoint>>>,
    preflight: Vec<PreflightPath>,
}

impl Builder {
    fn collect(&mut self, entries: Vec<Entry>, scope: &Scope) -> Result<()> {
        for entry in entries {
            match entry {
                Entry::Route { method, pattern, handlers } => {
                    let joined = join(&scope.prefix, &pattern)?;
                    if handlers.is_empty() {
                        return Err(route_error(&joined, "route has no handlers"));
                    }
                    let compiled = compile(&joined)?;
                    let chain = scope.chain(handlers.0, Kind::Route);
                    self.insert(method, &joined, compiled.clone(), chain)?;
                    self.note_method(compiled, method, scope);
                }
                Entry::Prefix { segment, children } => {
                    let mut inner = scope.clone();
                    inner.prefix = join_prefix(&scope.prefix, &segment)?;
                    self.collect(children, &inner)?;
                }
                Entry::Intercept { interceptor, children } => {
                    self.collect(children, &scope.intercepted_by(interceptor))?;
                }
                Entry::Rescue { handler, children } => {
                    let mut inner = scope.clone();
                    inner.rescue = Some(handler);
                    self.collect(children, &inner)?;
                }
                Entry::Auth { backend, children } => {
                    self.collect(children, &scope.intercepted_by(Authenticate::boxed(backend)))?;
                }
                Entry::Assets { segment, dir } => {
                    let mount = join_prefix(&scope.prefix, &segment)?;
                    let compiled = format!("{}/{{*{ASSET_PARAM}}}", compile(&mount)?);
                    let root = Arc::new(dir);
                    let serve = move |ctx: Context| serve_file(Arc::clone(&root), ctx);
                    let chain = scope.chain(vec![serve.into_boxed_handler()], Kind::Asset);
                    self.insert(Method::Get, &mount, compiled, chain)?;
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, method: Method, declared: &str, compiled: String, chain: Chain) -> Result<()> {
        debug!(%method, pattern = %compiled, kind = ?chain.kind(), "route registered");
        let endpoint = Arc::new(Endpoint::new(&compiled, chain));
        self.routes
            .entry(method)
            .or_default()
            .insert(compiled, endpoint)
            .map_err(|e| route_error(declared, &e.to_string()))
    }

    fn note_method(&mut self, pattern: String, method: Method, scope: &Scope) {
        let declared = (method, scope.clone());
        match self.preflight.iter_mut().find(|p| p.pattern == pattern) {
            Some(path) => path.methods.push(declared),
            None => self.preflight.push(PreflightPath { pattern, methods: vec![declared] }),
        }
    }

    fn finish(self) -> Result<Router> {
        let mut preflight = MatchitRouter::new();
        for path in self.preflight {
            if path.methods.iter().any(|(m, _)| *m == Method::Options) {
                continue;
            }
            let mut allow: Vec<&str> = path.methods.iter().map(|(m, _)| m.as_str()).collect();
            allow.push(Method::Options.as_str());
            let allow: Arc<str> = Arc::from(allow.join(", "));

            let answer = move |_ctx: Context| {
                let allow = Arc::clone(&allow);
                async move { Response::builder().header("allow", &allow).no_body() }
            };
            let answer = answer.into_boxed_handler();
            let preflights: Vec<(Method, Chain)> = path
                .methods
                .iter()
                .map(|(method, scope)| (*method, scope.chain(vec![Arc::clone(&answer)], Kind::Preflight)))
                .collect();
            let Some((_, first)) = preflights.first() else {
                continue;
            };
            let endpoint = Endpoint { pattern: Arc::from(path.pattern.as_str()), chain: first.clone(), preflights };
            if let Err(e) = preflight.insert(path.pattern.clone(), Arc::new(endpoint)) {
                warn!(pattern = %path.pattern, error = %e, "no automatic OPTIONS answer for pattern");
            }
        }
        Ok(Router { routes: self.routes, preflight, not_found: None })
    }
}

fn route_error(pattern: &str, reason: &str) -> Error {
    Error::Route { pattern: pattern.to_owned(), reason: reason.to_owned() }
}

/// Joins a scope prefix and a child segment. Prefixes never keep a trailing
/// `/`; the root prefix is empty.
fn join_prefix(prefix: &str, segment: &str) -> Result<String> {
    if segment.is_empty() {
        return Ok(prefix.to_owned());
    }
    if !segment.starts_with('/') {
        return Err(route_error(segment, "must start with `/`"));
    }
    Ok(format!("{prefix}{}", segment.trim_end_matches('/')))
}

fn join(prefix: &str, pattern: &str) -> Result<String> {
    if !pattern.starts_with('/') {
        return Err(route_error(pattern, "must start with `/`"));
    }
    if pattern == "/" && !prefix.is_empty() {
        return Ok(prefix.to_owned());
    }
    Ok(format!("{prefix}{pattern}"))
}

/// Rewrites `:name` segments to the radix tree's `{name}` syntax and escapes
/// literal braces.
fn compile(pattern: &str) -> Result<String> {
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut seen: Vec<&str> = Vec::new();
    for (i, segment) in pattern.split('/').enumerate() {
        if i > 0 {
            out.push('/');
        }
        match segment.strip_prefix(':') {
            Some(name) => {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(route_error(pattern, &format!("invalid parameter name `{name}`")));
                }
                if seen.contains(&name) {
                    return Err(route_error(pattern, &format!("parameter `{name}` appears twice")));
                }
                seen.push(name);
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
            None => {
                for c in segment.chars() {
                    match c {
                        '{' => out.push_str("{{"),
                        '}' => out.push_str("}}"),
                        c => out.push(c),
                    }
                }
            }
        }
    }
    Ok(out)
}

// ── Assets ────────────────────────────────────────────────────────────────────

async fn serve_file(root: Arc<PathBuf>, ctx: Context) -> Result<Response> {
    let requested = ctx.param(ASSET_PARAM).unwrap_or_default();
    let Some(path) = resolve(&root, requested) else {
        debug!(path = ctx.path(), "asset path rejected");
        return Ok(Response::not_found());
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            Ok(Response::builder().bytes(ContentType::from_extension(ext), bytes))
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::IsADirectory) => {
            Ok(Response::not_found())
        }
        Err(e) => Err(e.into()),
    }
}

/// Maps a request path below a mount onto the mount directory. Anything but
/// plain file names (`..`, roots, prefixes) is refused.
fn resolve(root: &Path, requested: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    let mut depth = 0;
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(name) => {
                path.push(name);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (depth > 0).then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route;

    async fn ok(_ctx: Context) -> &'static str {
        "ok"
    }

    #[test]
    fn colon_parameters_become_radix_parameters() {
        assert_eq!(compile("/users/:id/posts/:post_id").unwrap(), "/users/{id}/posts/{post_id}");
        assert_eq!(compile("/literal{braces}").unwrap(), "/literal{{braces}}");
    }

    #[test]
    fn repeated_parameter_names_are_rejected() {
        let err = Router::new(vec![route::get("/a/:id/b/:id", ok)]).unwrap_err();
        assert!(matches!(err, Error::Route { .. }), "{err}");
    }

    #[test]
    fn empty_parameter_names_are_rejected() {
        assert!(Router::new(vec![route::get("/a/:", ok)]).is_err());
    }

    #[test]
    fn duplicate_routes_are_rejected() {
        let err = Router::new(vec![route::get("/a", ok), route::get("/a", ok)]).unwrap_err();
        assert!(matches!(err, Error::Route { .. }));
    }

    #[test]
    fn relative_patterns_are_rejected() {
        assert!(Router::new(vec![route::get("users", ok)]).is_err());
        assert!(Router::new(vec![route::prefix("api", vec![route::get("/x", ok)])]).is_err());
    }

    #[test]
    fn single_parameter_binds_the_segment() {
        let router = Router::new(vec![route::get("/:name", ok)]).unwrap();
        let (endpoint, params) = router.lookup(Method::Get, "/foo").unwrap();
        assert_eq!(params, Params::from([("name".to_owned(), "foo".to_owned())]));
        assert_eq!(&*endpoint.pattern, "/{name}");
        assert!(router.lookup(Method::Get, "/").is_err());
        assert!(router.lookup(Method::Get, "/foo/bar").is_err());
    }

    #[test]
    fn prefixes_join_onto_children() {
        let router = Router::new(vec![route::prefix("/api/", vec![
            route::get("/", ok),
            route::prefix("/v1", vec![route::get("/items/:id", ok)]),
        ])])
        .unwrap();
        assert!(router.lookup(Method::Get, "/api").is_ok());
        let (_, params) = router.lookup(Method::Get, "/api/v1/items/7").unwrap();
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
        assert!(router.lookup(Method::Post, "/api/v1/items/7").is_err());
    }

    #[test]
    fn head_falls_back_to_get() {
        let router = Router::new(vec![route::get("/page", ok)]).unwrap();
        let (endpoint, _) = router.lookup(Method::Head, "/page").unwrap();
        assert_eq!(endpoint.chain.kind(), Kind::Route);
    }

    #[test]
    fn options_on_known_path_is_a_preflight() {
        let router = Router::new(vec![route::get("/items", ok), route::post("/items", ok)]).unwrap();
        let (endpoint, _) = router.lookup(Method::Options, "/items").unwrap();
        assert_eq!(endpoint.chain.kind(), Kind::Preflight);
        assert!(router.lookup(Method::Options, "/elsewhere").is_err());
    }

    #[test]
    fn explicit_options_route_wins() {
        let router = Router::new(vec![route::get("/items", ok), route::options("/items", ok)]).unwrap();
        let (endpoint, _) = router.lookup(Method::Options, "/items").unwrap();
        assert_eq!(endpoint.chain.kind(), Kind::Route);
    }

    #[test]
    fn asset_mounts_register_a_catch_all() {
        let router = Router::new(vec![route::prefix("/ui", vec![route::assets("/static/", "./public")])]).unwrap();
        let (endpoint, params) = router.lookup(Method::Get, "/ui/static/css/site.css").unwrap();
        assert_eq!(endpoint.chain.kind(), Kind::Asset);
        assert_eq!(params.get(ASSET_PARAM).map(String::as_str), Some("css/site.css"));
    }

    #[test]
    fn traversal_is_refused() {
        let root = Path::new("/srv/public");
        assert_eq!(resolve(root, "css/site.css"), Some(PathBuf::from("/srv/public/css/site.css")));
        assert_eq!(resolve(root, "./a.txt"), Some(PathBuf::from("/srv/public/a.txt")));
        assert_eq!(resolve(root, "../secret"), None);
        assert_eq!(resolve(root, "css/../../secret"), None);
        assert_eq!(resolve(root, "/etc/passwd"), None);
        assert_eq!(resolve(root, ""), None);
    }

    #[test]
    fn misses_are_not_found_errors() {
        let router = Router::new(vec![route::get("/items", ok)]).unwrap();
        let miss = router.lookup(Method::Delete, "/items").map(|_| ());
        assert!(
            matches!(miss, Err(Error::NotFound { ref method, ref path }) if method == "DELETE" && path == "/items"),
            "{miss:?}"
        );
    }

    #[test]
    fn preflight_picks_the_scope_of_the_requested_method() {
        let router = Router::new(vec![route::get("/items", ok), route::post("/items", ok)]).unwrap();
        let (endpoint, _) = router.lookup(Method::Options, "/items").unwrap();
        let head = |requested: &str| {
            let mut headers = http::HeaderMap::new();
            headers.insert("access-control-request-method", requested.parse().unwrap());
            crate::context::test_context(Method::Options, "/items", headers).shared_head()
        };
        assert_eq!(endpoint.preflights.iter().map(|(m, _)| *m).collect::<Vec<_>>(), [Method::Get, Method::Post]);
        assert!(std::ptr::eq(endpoint.chain_for(&head("GET")), &endpoint.preflights[0].1));
        assert!(std::ptr::eq(endpoint.chain_for(&head("POST")), &endpoint.preflights[1].1));
        assert!(std::ptr::eq(endpoint.chain_for(&head("PUT")), &endpoint.chain));
    }
}
