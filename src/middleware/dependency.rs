//! Outbound call tracking.

use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::telemetry::{
    DependencyKind, DependencyRecord, ExceptionRecord, Properties, Telemetry, duration_ms,
};

/// Result code recorded when the tracked future is dropped before it
/// resolves.
const CANCELED: &str = "Canceled";

/// Describes an outbound call before it is made.
#[derive(Clone, Debug)]
pub struct DependencyCall {
    /// Operation name, e.g. `GET /`.
    pub name: String,
    /// Host or resource the call talks to.
    pub target: String,
    /// Command or URL.
    pub data: String,
    pub kind: DependencyKind,
}

impl DependencyCall {
    /// An HTTP call. Name is `METHOD path`, target is the host (with the
    /// port when it is not the scheme's default).
    pub fn http(method: &http::Method, url: &reqwest::Url) -> Self {
        let target = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None)       => host.to_owned(),
            (None, _)                => url.as_str().to_owned(),
        };
        Self {
            name: format!("{method} {}", url.path()),
            target,
            data: url.as_str().to_owned(),
            kind: DependencyKind::Http,
        }
    }
}

/// The result code a finished call reports to telemetry: the HTTP status
/// for HTTP calls, an error class otherwise.
pub trait DependencyOutcome {
    fn result_code(&self) -> String;
}

impl DependencyOutcome for http::StatusCode {
    fn result_code(&self) -> String {
        self.as_u16().to_string()
    }
}

impl Telemetry {
    /// Runs `call` as a tracked dependency.
    ///
    /// One [`DependencyRecord`] is emitted when the future resolves: `Ok` is
    /// a success, `Err` a failure. A failure also emits an
    /// [`ExceptionRecord`]. The result, or the error, is returned unchanged.
    /// If the future is dropped first, a failed record with result code
    /// `Canceled` is emitted instead.
    pub async fn track_dependency<F, T, E>(&self, call: DependencyCall, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        T: DependencyOutcome,
        E: DependencyOutcome + std::error::Error,
    {
        let mut scope = DependencyScope::start(self, call);
        let res = fut.await;
        match &res {
            Ok(v)  => scope.finish(v.result_code(), true),
            Err(e) => {
                let code = e.result_code();
                scope.fail_with(e, &code);
                scope.finish(code, false);
            }
        }
        res
    }
}

/// Start/end bookkeeping for one outbound call.
struct DependencyScope {
    telemetry: Telemetry,
    call: Option<DependencyCall>,
    start_time: DateTime<Utc>,
    started: Instant,
}

impl DependencyScope {
    fn start(telemetry: &Telemetry, call: DependencyCall) -> Self {
        Self {
            telemetry: telemetry.clone(),
            call: Some(call),
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    fn fail_with<E: std::error::Error>(&self, err: &E, result_code: &str) {
        let Some(call) = &self.call else { return };
        let mut properties = Properties::new();
        properties.insert("dependency".to_owned(), call.name.clone());
        properties.insert("target".to_owned(), call.target.clone());
        properties.insert("resultCode".to_owned(), result_code.to_owned());

        self.telemetry.emit_exception(ExceptionRecord {
            type_name: short_type_name::<E>().to_owned(),
            message: error_chain(err),
            properties,
            operation: None,
        });
    }

    fn finish(&mut self, result_code: String, success: bool) {
        let Some(call) = self.call.take() else { return };
        let duration_ms = duration_ms(self.started.elapsed());
        debug!(
            name = %call.name,
            target = %call.target,
            result_code = %result_code,
            success,
            duration_ms,
            "dependency call completed",
        );

        self.telemetry.emit_dependency(DependencyRecord {
            name: call.name,
            target: call.target,
            data: call.data,
            start_time: self.start_time,
            duration_ms,
            result_code,
            success,
            kind: call.kind,
            operation: None,
        });
    }
}

impl Drop for DependencyScope {
    fn drop(&mut self) {
        self.finish(CANCELED.to_owned(), false);
    }
}

/// `beacon::outbound::DependencyError` → `DependencyError`.
fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Display of the error and each of its sources, joined by `: `.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}
