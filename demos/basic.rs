//! A small spindle service: delegation, scoped error handlers, CORS,
//! sessions, a streamed body, server-sent events, and health checks.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X OPTIONS http://localhost:3000/users/42 \
//!        -H 'origin: https://app.example' -H 'access-control-request-method: GET'
//!   curl -c jar -b jar http://localhost:3000/visits
//!   curl http://localhost:3000/stream
//!   curl -N http://localhost:3000/events
//!   curl http://localhost:3000/admin/boom
//!   curl http://localhost:3000/healthz

use std::time::Duration;

use futures_util::stream;
use http::StatusCode;
use serde_json::json;
use spindle::middleware::Cors;
use spindle::{
    Context, Dispatcher, Error, MemoryStore, Outcome, Reply, Response, Router, Server, SessionConfig,
    chain, health, middleware, route, sse,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let router = Router::new(vec![
        route::get("/healthz", health::liveness),
        route::get("/readyz", health::readiness),
        route::intercept(middleware::trace, vec![
            route::intercept(Cors::any().allow_headers(["content-type"]).max_age(Duration::from_secs(600)), vec![
                route::rescue(api_error, vec![
                    route::get("/users/:id", chain![load_user, show_user]),
                    route::get("/visits", visits),
                    route::get("/stream", hello_stream),
                    route::get("/events", events),
                ]),
            ]),
            route::prefix("/admin", vec![
                route::rescue(admin_error, vec![route::get("/boom", boom)]),
            ]),
        ]),
    ])?;

    let app = Dispatcher::new(router).with_sessions(MemoryStore::new(), SessionConfig::default());
    Server::bind("0.0.0.0:3000").serve(app).await
}

// GET /users/:id — first handler loads, second renders.
async fn load_user(ctx: Context) -> Outcome {
    let id = ctx.param("id").unwrap_or_default().to_owned();
    ctx.delegate_with([("user", json!({ "id": id, "name": "alice" }))])
}

async fn show_user(ctx: Context) -> Response {
    let user = ctx.field("user").cloned().unwrap_or_default();
    Response::json(user.to_string())
}

async fn visits(ctx: Context) -> Result<String, Error> {
    let session = ctx.session().ok_or_else(|| Error::handler("sessions are not enabled"))?;
    let count = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    session.insert("visits", count);
    Ok(format!("visit {count}"))
}

// Body assembled from a stream: "hello world".
async fn hello_stream(_ctx: Context) -> Reply {
    Reply::stream(stream::iter([Ok::<_, Error>("hello "), Ok("world")]))
}

async fn events(_ctx: Context) -> sse::Sse {
    let (tx, events) = sse::channel(8);
    tokio::spawn(async move {
        for n in 0..5u32 {
            let event = sse::Event::data(json!({ "tick": n }).to_string()).event("tick").id(n.to_string());
            if tx.send(event).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });
    events.keep_alive(Duration::from_secs(15))
}

async fn boom(_ctx: Context) -> Result<Response, Error> {
    Err(Error::handler("the admin panel is on fire"))
}

async fn api_error(_ctx: Context, err: Error) -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .json(json!({ "error": err.to_string() }).to_string())
}

async fn admin_error(_ctx: Context, err: Error) -> String {
    format!("admin failure: {}", err.kind())
}
