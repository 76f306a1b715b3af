//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()` — no new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.
//!
//! Long-lived streaming responses (SSE, channel bodies) keep their
//! connection in flight until the producer finishes, so give them an end
//! condition or a grace period that covers them.

use std::future::Future;
use std::net::SocketAddr;

use futures_util::future::BoxFuture;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::body::RequestBody;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{BoxError, Result};
use crate::response::HttpBody;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use spindle::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    pub fn from_config(config: &Config) -> Self {
        Self { addr: config.addr }
    }

    /// Accepts connections and dispatches them until SIGTERM or Ctrl-C,
    /// then drains in-flight connections.
    ///
    /// Takes a [`Router`](crate::Router) or a configured [`Dispatcher`].
    pub async fn serve(self, app: impl Into<Dispatcher>) -> Result<()> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Like [`serve`](Server::serve) but stops accepting when `shutdown`
    /// resolves.
    pub async fn serve_with_shutdown<F>(self, app: impl Into<Dispatcher>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.addr).await?;
        let dispatcher = app.into();

        info!(addr = %self.addr, "spindle listening");

        let mut tasks = tokio::task::JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let dispatcher = dispatcher.clone();
                    let io = TokioIo::new(stream);

                    let svc = service_fn(move |req| {
                        let dispatcher = dispatcher.clone();
                        dispatch(dispatcher, req, peer)
                    });
                    let conn: BoxFuture<'static, std::result::Result<(), BoxError>> = Box::pin(
                        ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .into_owned(),
                    );

                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            error!(%peer, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("spindle stopped");
        Ok(())
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Hot path: one request in, one response out.
///
/// An `Err` makes hyper abort the connection; that only happens when no
/// handler answered at all. The future is boxed as `Send` here, where every
/// lifetime is concrete, so the connection task can be spawned.
fn dispatch(
    dispatcher: Dispatcher,
    req: hyper::Request<hyper::body::Incoming>,
    peer: SocketAddr,
) -> BoxFuture<'static, std::result::Result<http::Response<HttpBody>, BoxError>> {
    Box::pin(async move {
        debug!(%peer, method = %req.method(), path = req.uri().path(), "request received");
        let req = req.map(RequestBody::incoming);
        let res = dispatcher.handle(req).await?;
        Ok(res.into_http())
    })
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
