//! Inbound request timing.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::{debug, warn};

use crate::telemetry::{Operation, RequestRecord, Telemetry, duration_ms};

/// Status recorded when the request future is dropped before a response
/// exists: the client went away.
const CLIENT_CLOSED: u16 = 499;

/// Per-request telemetry scope.
///
/// Created by [`RequestContext::start`] when a request arrives and finalized
/// exactly once: by [`finish`](RequestContext::finish) on the normal path,
/// or by `Drop` when the request is abandoned (connection closed mid-flight,
/// handler panicked). Abandoned requests are recorded as failures with
/// status `499`, or `500` while unwinding from a panic.
///
/// The context also owns the request's [`Telemetry`] clone, scoped to an
/// [`Operation`] whose id is the request id. Handlers receive that clone, so
/// their dependencies, exceptions and events point back at the request.
#[must_use = "dropping a RequestContext records the request as abandoned"]
pub struct RequestContext {
    telemetry: Telemetry,
    id: String,
    method: String,
    path: String,
    full_url: String,
    start_time: DateTime<Utc>,
    started: Instant,
    finished: bool,
}

impl RequestContext {
    /// Starts the timer. Never fails and emits nothing.
    pub fn start(telemetry: &Telemetry, method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let operation = Operation { id: id.clone(), name: format!("{method} {}", uri.path()) };
        Self {
            telemetry: telemetry.scoped(operation),
            id,
            method: method.as_str().to_owned(),
            path: uri.path().to_owned(),
            full_url: full_url(uri, headers),
            start_time: Utc::now(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// The handle to pass to the handler.
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Time since [`start`](RequestContext::start).
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Finalizes the request with the response status.
    pub fn finish(mut self, status: StatusCode) {
        self.emit(status.as_u16());
    }

    fn emit(&mut self, status: u16) {
        if self.finished {
            return;
        }
        self.finished = true;

        let duration_ms = duration_ms(self.started.elapsed());
        debug!(
            method = %self.method,
            path = %self.path,
            status,
            duration_ms,
            "request completed",
        );

        self.telemetry.emit_request(RequestRecord {
            id: std::mem::take(&mut self.id),
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            full_url: std::mem::take(&mut self.full_url),
            start_time: self.start_time,
            duration_ms,
            status_code: status,
            success: status < 400,
        });
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let status = if std::thread::panicking() {
            StatusCode::INTERNAL_SERVER_ERROR.as_u16()
        } else {
            CLIENT_CLOSED
        };
        warn!(method = %self.method, path = %self.path, status, "request abandoned before completion");
        self.emit(status);
    }
}

/// Rebuilds the URL the client asked for. Behind a proxy the scheme comes
/// from `x-forwarded-proto`.
fn full_url(uri: &Uri, headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");

    let host = uri
        .authority()
        .map(|a| a.as_str())
        .or_else(|| headers.get(http::header::HOST).and_then(|v| v.to_str().ok()))
        .unwrap_or("localhost");

    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{scheme}://{host}{path_and_query}")
}
