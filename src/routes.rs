//! The service's HTTP surface.
//!
//! | Route | Answer |
//! |---|---|
//! | `GET /healthz` | `200 ok` (liveness: the process answers HTTP) |
//! | `GET /readyz` | `200 ready` (readiness: no warm-up, always ready) |
//! | `GET /` | `200` greeting |
//! | `GET /slow` | `200` after a random delay in `[250, 1750)` ms |
//! | `GET /external` | `200` if the outbound fetch succeeds, `502` otherwise |
//!
//! None of these answers depend on whether telemetry is enabled.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use rand::Rng;
use tracing::warn;

use crate::outbound::ExternalClient;
use crate::telemetry::Telemetry;
use crate::{Request, Response, Router};

pub const GREETING: &str = "Hello from Rust on AKS!";

/// Bounds of the `/slow` delay in milliseconds, end exclusive.
pub const SLOW_DELAY_MS: Range<u64> = 250..1750;

/// Builds the full application router.
pub fn app(telemetry: Telemetry, client: ExternalClient) -> Router {
    let client = Arc::new(client);
    Router::new()
        .telemetry(telemetry)
        .get("/healthz", liveness)
        .get("/readyz", readiness)
        .get("/", root)
        .get("/slow", slow)
        .get("/external", move |req: Request| external(req, Arc::clone(&client)))
}

/// Kubernetes liveness check. No dependencies: if the process can
/// answer HTTP it is alive.
pub async fn liveness(_req: Request) -> Response {
    Response::text("ok")
}

/// Kubernetes readiness check.
pub async fn readiness(_req: Request) -> Response {
    Response::text("ready")
}

pub async fn root(_req: Request) -> Response {
    Response::text(GREETING)
}

/// Sleeps for a random delay to produce request latency, then reports it.
pub async fn slow(req: Request) -> Response {
    let ms = rand::thread_rng().gen_range(SLOW_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;

    req.telemetry().track_event("SlowRequest", [("delayMs", ms.to_string())]);
    Response::text(format!("Slept {ms}ms"))
}

/// Fetches the external URL as a tracked dependency.
pub async fn external(req: Request, client: Arc<ExternalClient>) -> Response {
    match client.fetch(req.telemetry()).await {
        Ok(_) => Response::text(format!("Fetched {}", client.host())),
        Err(e) => {
            warn!(error = %e, "external dependency failed");
            Response::builder()
                .status(StatusCode::BAD_GATEWAY)
                .text("Upstream request failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    #[tokio::test]
    async fn health_checks_and_root() {
        let req = || Request::for_test(Method::GET, "/", Telemetry::disabled());
        assert_eq!(liveness(req()).await.body(), b"ok");
        assert_eq!(readiness(req()).await.body(), b"ready");
        assert_eq!(root(req()).await.body(), GREETING.as_bytes());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reports_a_delay_in_bounds() {
        let res = slow(Request::for_test(Method::GET, "/slow", Telemetry::disabled())).await;
        let body = std::str::from_utf8(res.body()).unwrap();
        let ms: u64 = body
            .strip_prefix("Slept ")
            .and_then(|s| s.strip_suffix("ms"))
            .unwrap()
            .parse()
            .unwrap();
        assert!(SLOW_DELAY_MS.contains(&ms), "{ms} out of bounds");
    }
}
