//! Built-in Kubernetes health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! Declare them next to your routes, outside any auth mount:
//!
//! ```rust
//! use spindle::{Router, health, route};
//!
//! let app = Router::new(vec![
//!     route::get("/healthz", health::liveness),
//!     route::get("/readyz", health::readiness),
//! ]).unwrap();
//! ```
//!
//! Replace `readiness` with your own handler to gate on dependencies:
//!
//! ```rust
//! use http::StatusCode;
//! use spindle::{Context, Response};
//!
//! async fn readiness(_ctx: Context) -> Response {
//!     if dependencies_are_healthy().await {
//!         Response::text("ready")
//!     } else {
//!         Response::status(StatusCode::SERVICE_UNAVAILABLE)
//!     }
//! }
//!
//! async fn dependencies_are_healthy() -> bool { true }
//! ```

use crate::{Context, Response};

/// Always `200 OK` with body `"ok"`.
pub async fn liveness(_ctx: Context) -> Response {
    Response::text("ok")
}

/// `200 OK` with body `"ready"`.
pub async fn readiness(_ctx: Context) -> Response {
    Response::text("ready")
}
