//! # spindle
//!
//! A request-handling kernel for HTTP services on hyper.
//!
//! ## The model
//!
//! - A **route tree** of plain values ([`route::Entry`]) declares methods,
//!   prefixes, interceptors, error handlers, auth mounts, and asset mounts.
//!   [`Router::new`] compiles it once into radix trees, one per method.
//! - A **handler** is an `async fn(Context) -> impl IntoOutcome`. It answers
//!   with anything that converts into a [`Reply`] or hands the request to the
//!   next handler of the route with [`Context::delegate_with`].
//! - An **interceptor** is an `async fn(Context, Kind, Next) -> Result<Response>`
//!   wrapped around everything below it in the tree.
//! - A **reply** may be a value, a future, a channel, or a stream.
//!   [`coerce`] normalizes it into a [`Response`] whose body is written as
//!   it becomes available.
//! - Failures go to the lexically nearest error handler, or become `500`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use spindle::{Context, Error, Outcome, Response, Router, Server, chain, middleware, route};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let app = Router::new(vec![
//!         route::intercept(middleware::trace, vec![
//!             route::rescue(api_error, vec![
//!                 route::get("/users/:id", chain![load_user, show_user]),
//!                 route::post("/users", create_user),
//!             ]),
//!         ]),
//!     ])?;
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn load_user(ctx: Context) -> Outcome {
//!     let id = ctx.param("id").unwrap_or_default().to_owned();
//!     ctx.delegate_with([("user", id)])
//! }
//!
//! async fn show_user(ctx: Context) -> Response {
//!     let user = ctx.field("user").cloned().unwrap_or_default();
//!     Response::json(serde_json::json!({ "id": user }).to_string())
//! }
//!
//! async fn create_user(mut ctx: Context) -> Result<Response, Error> {
//!     let body = ctx.body().await?;
//!     if body.is_empty() {
//!         return Ok(Response::status(http::StatusCode::BAD_REQUEST));
//!     }
//!     Ok(Response::builder()
//!         .status(http::StatusCode::CREATED)
//!         .header("location", "/users/99")
//!         .json(body))
//! }
//!
//! async fn api_error(_ctx: Context, err: Error) -> Response {
//!     Response::builder()
//!         .status(http::StatusCode::INTERNAL_SERVER_ERROR)
//!         .json(format!(r#"{{"error":"{}"}}"#, err.kind()))
//! }
//! ```

mod body;
mod config;
mod context;
mod dispatcher;
mod error;
mod handler;
mod interceptor;
mod method;
mod reply;
mod response;
mod router;
mod server;

pub mod health;
pub mod middleware;
pub mod route;
pub mod session;
pub mod sse;
pub mod writer;

pub use body::RequestBody;
pub use config::Config;
pub use context::{Context, Fields, Params, RequestHead};
pub use dispatcher::Dispatcher;
pub use error::{BoxError, Error, Result};
pub use handler::{Handler, Handlers, IntoHandlers, IntoOutcome, Outcome, Rescue};
pub use interceptor::{Interceptor, Kind, Next};
pub use method::Method;
pub use reply::{IntoReply, Reply, coerce};
pub use response::{Body, ContentType, HttpBody, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;
pub use session::{MemoryStore, Session, SessionConfig, SessionStore};
