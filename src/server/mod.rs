//! HTTP front end: a `tiny_http` listener on localhost whose worker
//! threads poll for requests until shutdown and hand each `POST` under
//! `/api/v1` to [`handlers::handle`].

pub mod handlers;
pub mod protocol;

use std::io::Read;
use std::time::{Duration, Instant};

use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, error, info, warn};

use crate::context::IndexerContext;
use crate::error::{IndexError, Result};

use handlers::ROUTES;
use protocol::CommonResponse;

pub const API_PREFIX: &str = "/api/v1";

/// Threads pulling requests off the listener.
pub const HANDLER_THREADS: usize = 4;

/// How long a handler thread waits for a request before checking shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Serve the API on `127.0.0.1:<port>` until `ctx.shutdown` is raised.
pub fn serve(ctx: &IndexerContext) -> Result<()> {
    let addr = format!("127.0.0.1:{}", ctx.config.port());
    let server = Server::http(&addr)
        .map_err(|e| IndexError::Io(std::io::Error::other(format!("cannot listen on {}: {}", addr, e))))?;
    info!(addr = %addr, "HTTP server listening");

    std::thread::scope(|s| {
        for i in 0..HANDLER_THREADS {
            let server = &server;
            let spawned = std::thread::Builder::new()
                .name(format!("haystack-http-{}", i))
                .spawn_scoped(s, move || accept_loop(server, ctx));
            if let Err(e) = spawned {
                error!(error = %e, "Cannot start HTTP worker");
                ctx.shutdown.trigger();
                return Err(IndexError::from(e));
            }
        }
        Ok(())
    })?;

    info!("HTTP server stopped");
    Ok(())
}

fn accept_loop(server: &Server, ctx: &IndexerContext) {
    while !ctx.shutdown.is_triggered() {
        match server.recv_timeout(POLL_INTERVAL) {
            Ok(Some(request)) => respond(ctx, request),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to receive request"),
        }
    }
}

/// Status code and envelope for one request.
fn route_request(ctx: &IndexerContext, request: &mut Request) -> (u16, CommonResponse) {
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or_default();
    let route = path
        .strip_prefix(API_PREFIX)
        .filter(|r| ROUTES.contains(r) && *request.method() == Method::Post);
    let Some(route) = route else {
        return (404, CommonResponse::failure(format!("{} {} not found", request.method(), path)));
    };
    let mut body = Vec::new();
    if let Err(e) = request.as_reader().read_to_end(&mut body) {
        return (400, CommonResponse::failure(format!("cannot read request body: {}", e)));
    }
    (200, handlers::handle(ctx, route, &body))
}

fn respond(ctx: &IndexerContext, mut request: Request) {
    let started = Instant::now();
    let (status, response) = route_request(ctx, &mut request);
    debug!(
        method = %request.method(),
        url = %request.url(),
        status,
        code = response.code,
        elapsed_ms = format_args!("{:.1}", started.elapsed().as_secs_f64() * 1000.0),
        "Handled request"
    );

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"code":1,"message":"cannot encode response"}"#.to_string());
    let mut reply = Response::from_string(body).with_status_code(status);
    if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        reply.add_header(header);
    }
    if let Err(e) = request.respond(reply) {
        warn!(error = %e, "Failed to send response");
    }
}
