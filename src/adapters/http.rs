//! Read-only observability HTTP server.
//!
//! ```text
//!   GET /api/status              session, tick, rate, ceiling, warnings
//!   GET /api/telemetry           latest snapshot
//!   GET /api/telemetry/history   last 1000 snapshots
//!   GET /api/control             latest command
//!   GET /api/state               latest derived state
//!   GET /api/alerts              last 100 alerts
//!   GET /api/config              running configuration
//!   GET / | /api                 endpoint index
//! ```
//!
//! Routing is the pure function [`route`]; the server only copies the
//! published snapshot and serialises what `route` returns.  The server
//! runs a single-threaded tokio runtime on its own OS thread with one task
//! per connection, and stops when [`ObservabilityServer::shutdown`] fires
//! its oneshot.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::snapshot::{PublishedSnapshot, SnapshotHandle};

pub const API_VERSION: &str = "4.0.0";

const ENDPOINTS: [&str; 7] = [
    "/api/status",
    "/api/telemetry",
    "/api/telemetry/history",
    "/api/control",
    "/api/state",
    "/api/alerts",
    "/api/config",
];

// ───────────────────────────────────────────────────────────────
// Routing
// ───────────────────────────────────────────────────────────────

fn error_body(message: &str) -> Value {
    json!({ "error": message })
}

fn or_unavailable<T: serde::Serialize>(value: Option<&T>, what: &str) -> (StatusCode, Value) {
    match value {
        Some(v) => (StatusCode::OK, json!(v)),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            error_body(&format!("no {what} published yet")),
        ),
    }
}

/// Map a request onto a status code and JSON body.
pub fn route(method: &Method, path: &str, snap: &PublishedSnapshot) -> (StatusCode, Value) {
    if *method != Method::GET {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            error_body("method not allowed; this API is read-only"),
        );
    }

    let trimmed = path.trim_end_matches('/');
    let path = if trimmed.is_empty() { "/" } else { trimmed };

    match path {
        "/" | "/api" => (
            StatusCode::OK,
            json!({
                "service": "ivctl",
                "version": API_VERSION,
                "endpoints": ENDPOINTS,
            }),
        ),
        "/api/status" => {
            let control = snap.latest_control.as_ref();
            (
                StatusCode::OK,
                json!({
                    "version": API_VERSION,
                    "session_id": snap.session_id,
                    "running": snap.running,
                    "started_at": snap.started_at,
                    "energy_model": snap.energy_model,
                    "tick": snap.tick,
                    "session_time_ms": snap.session_time_ms,
                    "infusion_ml_per_min": control.map(|c| c.infusion_ml_per_min),
                    "max_allowed_rate": snap.max_allowed_rate,
                    "cumulative_volume_ml": snap.cumulative_volume_ml,
                    "safety_override": control.is_some_and(|c| c.safety_override),
                    "warnings": control.map(|c| c.warning_flags.to_string()).unwrap_or_default(),
                    "alert_count": snap.alerts.len(),
                }),
            )
        }
        "/api/telemetry" => or_unavailable(snap.latest_telemetry.as_ref(), "telemetry"),
        "/api/telemetry/history" => (
            StatusCode::OK,
            json!({
                "count": snap.telemetry_history.len(),
                "samples": snap.telemetry_history,
            }),
        ),
        "/api/control" => match snap.latest_control.as_ref() {
            Some(c) => (
                StatusCode::OK,
                json!({
                    "infusion_ml_per_min": c.infusion_ml_per_min,
                    "confidence": c.confidence,
                    "rationale": c.rationale,
                    "safety_override": c.safety_override,
                    "warning_flags": c.warning_flags,
                    "max_allowed_rate": snap.max_allowed_rate,
                }),
            ),
            None => or_unavailable::<()>(None, "control output"),
        },
        "/api/state" => or_unavailable(snap.latest_state.as_ref(), "state"),
        "/api/alerts" => (
            StatusCode::OK,
            json!({
                "count": snap.alerts.len(),
                "alerts": snap.alerts,
            }),
        ),
        "/api/config" => (StatusCode::OK, json!(snap.config)),
        _ => (StatusCode::NOT_FOUND, error_body(&format!("unknown path {path}"))),
    }
}

fn respond(req: &Request<Incoming>, snapshot: &SnapshotHandle) -> Response<Full<Bytes>> {
    let snap = snapshot.read();
    let (status, body) = route(req.method(), req.uri().path(), &snap);
    debug!("HTTP {} {} -> {}", req.method(), req.uri().path(), status.as_u16());

    let mut resp = Response::new(Full::new(Bytes::from(body.to_string())));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}

// ───────────────────────────────────────────────────────────────
// Server
// ───────────────────────────────────────────────────────────────

/// Running server; stops on [`shutdown`](Self::shutdown) or drop.
pub struct ObservabilityServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ObservabilityServer {
    /// Bind `addr` and serve `snapshot` from a dedicated thread.  Binding
    /// happens before this returns so address errors surface immediately.
    pub fn start(addr: SocketAddr, snapshot: SnapshotHandle) -> Result<Self> {
        let std_listener = std::net::TcpListener::bind(addr)
            .map_err(|e| Error::Server(format!("bind {addr}: {e}")))?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| Error::Server(format!("nonblocking {addr}: {e}")))?;
        let local_addr = std_listener
            .local_addr()
            .map_err(|e| Error::Server(format!("local addr: {e}")))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Server(format!("runtime: {e}")))?;
        let (tx, rx) = oneshot::channel();

        let handle = thread::Builder::new()
            .name("ivctl-http".into())
            .spawn(move || runtime.block_on(serve(std_listener, snapshot, rx)))
            .map_err(|e| Error::Thread(format!("spawn http server: {e}")))?;

        info!("Observability API listening on http://{local_addr}");
        Ok(Self {
            local_addr,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal the accept loop and wait for the server thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Observability server thread panicked");
            }
            info!("Observability API stopped");
        }
    }
}

impl Drop for ObservabilityServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn serve(
    std_listener: std::net::TcpListener,
    snapshot: SnapshotHandle,
    mut shutdown: oneshot::Receiver<()>,
) {
    let listener = match TcpListener::from_std(std_listener) {
        Ok(l) => l,
        Err(e) => {
            warn!("Observability server: listener setup failed: {e}");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Observability server: accept failed: {e}");
                        continue;
                    }
                };
                let snapshot = snapshot.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let resp = respond(&req, &snapshot);
                        async move { Ok::<_, Infallible>(resp) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        debug!("HTTP connection {peer} closed with error: {e}");
                    }
                });
            }
        }
    }
}
