//! Per-request tracing span.

use std::time::Instant;

use tracing::{Instrument, info, info_span, warn};

use crate::context::Context;
use crate::error::Result;
use crate::interceptor::{Kind, Next};
use crate::response::Response;

/// Interceptor that wraps everything downstream in a `request` span and logs
/// one line per request with the status and latency.
///
/// ```rust
/// use spindle::{Context, middleware, route};
///
/// async fn index(_ctx: Context) -> &'static str { "hi" }
///
/// let app = route::intercept(middleware::trace, vec![route::get("/", index)]);
/// ```
pub async fn trace(ctx: Context, kind: Kind, next: Next) -> Result<Response> {
    let span = info_span!(
        "request",
        method = %ctx.method(),
        path = %ctx.path(),
        route = ctx.head().pattern().unwrap_or("-"),
        ?kind,
    );
    async move {
        let started = Instant::now();
        let res = next.run(ctx).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &res {
            Ok(res) => info!(status = res.status_code().as_u16(), elapsed_ms, "request finished"),
            Err(e) => warn!(error = %e, kind = e.kind(), elapsed_ms, "request failed"),
        }
        res
    }
    .instrument(span)
    .await
}
