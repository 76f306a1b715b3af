//! Built-in interceptors and request adapters.
//!
//! Everything here satisfies the ordinary [`Interceptor`](crate::Interceptor)
//! contract and is declared in the route tree like user code:
//!
//! - [`trace`] — per-request span with method, path, status, latency
//! - [`Cors`] — preflight answers and response headers for cross-origin calls
//! - [`auth`] — identity resolution behind [`route::auth`](crate::route::auth)

pub mod auth;
mod cors;
mod trace;

pub use auth::{AuthBackend, Identity, bearer_token};
pub use cors::Cors;
pub use trace::trace;
