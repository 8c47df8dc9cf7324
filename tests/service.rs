//! End-to-end tests: the real server on an ephemeral port, driven over HTTP,
//! with a recording sink standing in for Application Insights.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon::outbound::ExternalClient;
use beacon::routes::{self, GREETING, SLOW_DELAY_MS};
use beacon::telemetry::{MemorySink, Telemetry, TelemetryOptions};
use beacon::{Request, Response, Router, Server};
use http::StatusCode;
use tokio::sync::oneshot;

/// A running server. Dropping it stops the server.
struct Running {
    addr: SocketAddr,
    _stop: oneshot::Sender<()>,
}

impl Running {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

async fn spawn(router: Router) -> Running {
    let server = Server::bind(([127, 0, 0, 1], 0).into()).await.unwrap();
    let addr = server.local_addr();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server.serve_with_shutdown(router, async move {
        let _ = stopped.await;
    }));
    Running { addr, _stop: stop }
}

/// Stand-in for the external host.
async fn upstream() -> Running {
    spawn(
        Router::new()
            .get("/", |_req: Request| async { "upstream ok" })
            .get("/down", |_req: Request| async { Response::status(StatusCode::SERVICE_UNAVAILABLE) }),
    )
    .await
}

/// An address nothing listens on.
async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn recording() -> (Arc<MemorySink>, Telemetry) {
    let sink = Arc::new(MemorySink::new());
    let telemetry = Telemetry::new(sink.clone(), TelemetryOptions::default());
    (sink, telemetry)
}

/// Everything here talks to 127.0.0.1; a proxy from the environment must
/// not get in the way.
fn http() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn client(url: &str) -> ExternalClient {
    ExternalClient::with_client(url, http()).unwrap()
}

async fn get(url: &str) -> (StatusCode, String) {
    let res = http().get(url).send().await.unwrap();
    let status = res.status();
    (status, res.text().await.unwrap())
}

fn reported_delay(body: &str) -> u64 {
    body.strip_prefix("Slept ")
        .and_then(|s| s.strip_suffix("ms"))
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("unexpected /slow body {body:?}"))
}

// ── Health checks and plain routes ────────────────────────────────────────────

#[tokio::test]
async fn routes_answer_the_same_with_and_without_a_sink() {
    let up = upstream().await;
    let (sink, telemetry) = recording();
    let with_sink = spawn(routes::app(telemetry, client(&up.url("/")))).await;
    let without = spawn(routes::app(Telemetry::disabled(), client(&up.url("/")))).await;

    for path in ["/healthz", "/readyz", "/", "/external", "/missing"] {
        let a = get(&with_sink.url(path)).await;
        let b = get(&without.url(path)).await;
        assert_eq!(a, b, "{path} differs with telemetry enabled");
    }

    assert_eq!(get(&without.url("/healthz")).await, (StatusCode::OK, "ok".to_owned()));
    assert_eq!(get(&without.url("/readyz")).await, (StatusCode::OK, "ready".to_owned()));
    assert_eq!(get(&without.url("/")).await, (StatusCode::OK, GREETING.to_owned()));
    assert_eq!(get(&without.url("/missing")).await.0, StatusCode::NOT_FOUND);

    assert_eq!(sink.requests().len(), 5);
}

#[tokio::test]
async fn failing_sink_never_changes_a_response() {
    let (sink, telemetry) = recording();
    sink.fail(true);
    let app = spawn(routes::app(telemetry, client(&format!("http://{}/", closed_port().await)))).await;

    assert_eq!(get(&app.url("/healthz")).await, (StatusCode::OK, "ok".to_owned()));
    assert_eq!(get(&app.url("/readyz")).await, (StatusCode::OK, "ready".to_owned()));
    assert_eq!(get(&app.url("/external")).await.0, StatusCode::BAD_GATEWAY);

    // request x3, dependency, exception
    assert_eq!(sink.rejected(), 5);
    assert!(sink.requests().is_empty());
}

// ── Requests ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_request_record_per_request() {
    let (sink, telemetry) = recording();
    let app = spawn(routes::app(telemetry, client("https://example.com"))).await;

    get(&app.url("/healthz")).await;
    get(&app.url("/?from=test")).await;

    let records = sink.requests();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].path, "/healthz");
    assert_eq!(records[0].method, "GET");
    assert_eq!(records[0].status_code, 200);
    assert!(records[0].success);
    assert_eq!(records[1].full_url, app.url("/?from=test"));
    assert_ne!(records[0].id, records[1].id);
}

#[tokio::test]
async fn slow_delay_is_in_bounds_and_matches_the_record() {
    let (sink, telemetry) = recording();
    let app = spawn(routes::app(telemetry, client("https://example.com"))).await;

    let started = Instant::now();
    let (status, body) = get(&app.url("/slow")).await;
    let measured = started.elapsed();

    assert_eq!(status, StatusCode::OK);
    let delay = reported_delay(&body);
    assert!(SLOW_DELAY_MS.contains(&delay), "delay {delay} out of bounds");
    assert!(measured >= Duration::from_millis(delay));
    assert!(measured < Duration::from_millis(delay + 500), "took {measured:?} for {delay}ms");

    let records = sink.requests();
    assert_eq!(records.len(), 1);
    let recorded = records[0].duration_ms;
    assert!(recorded >= delay && recorded < delay + 200, "recorded {recorded} for {delay}");

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "SlowRequest");
    assert_eq!(events[0].properties["delayMs"], delay.to_string());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_slow_requests_keep_their_own_durations() {
    let (sink, telemetry) = recording();
    let app = Arc::new(spawn(routes::app(telemetry, client("https://example.com"))).await);

    let calls: Vec<_> = (0..6)
        .map(|_| {
            let url = app.url("/slow");
            tokio::spawn(async move { reported_delay(&get(&url).await.1) })
        })
        .collect();

    let mut delays = Vec::new();
    for call in calls {
        delays.push(call.await.unwrap());
    }

    let mut durations: Vec<u64> = sink.requests().iter().map(|r| r.duration_ms).collect();
    assert_eq!(durations.len(), delays.len());

    delays.sort_unstable();
    durations.sort_unstable();
    for (delay, duration) in delays.iter().zip(&durations) {
        assert!(
            *duration >= *delay && *duration < delay + 200,
            "duration {duration} does not belong to delay {delay}",
        );
    }
}

#[tokio::test]
async fn panicking_handler_answers_500_and_keeps_serving() {
    let (sink, telemetry) = recording();
    let app = spawn(
        Router::new()
            .telemetry(telemetry)
            .get("/boom", |_req: Request| async move {
                if true {
                    panic!("handler blew up");
                }
                "unreachable"
            })
            .get("/healthz", routes::liveness),
    )
    .await;

    let (status, _) = get(&app.url("/boom")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(get(&app.url("/healthz")).await, (StatusCode::OK, "ok".to_owned()));

    let statuses: Vec<u16> = sink.requests().iter().map(|r| r.status_code).collect();
    assert_eq!(statuses, [500, 200]);
    let exceptions = sink.exceptions();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].type_name, "Panic");
    assert_eq!(exceptions[0].message, "handler blew up");
}

#[tokio::test]
async fn oversized_body_is_413() {
    let (sink, telemetry) = recording();
    let app = spawn(routes::app(telemetry, client("https://example.com"))).await;

    let res = http()
        .get(app.url("/slow"))
        .body(vec![0_u8; beacon::MAX_BODY_BYTES + 1])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let requests = sink.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status_code, 413);
    assert!(sink.events().is_empty(), "the handler never ran");
}

// ── Dependencies ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn external_success_records_one_successful_dependency() {
    let up = upstream().await;
    let (sink, telemetry) = recording();
    let app = spawn(routes::app(telemetry, client(&up.url("/")))).await;

    let (status, body) = get(&app.url("/external")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Fetched 127.0.0.1");

    let deps = sink.dependencies();
    assert_eq!(deps.len(), 1);
    assert!(deps[0].success);
    assert_eq!(deps[0].result_code, "200");
    assert_eq!(deps[0].name, "GET /");
    assert_eq!(deps[0].target, up.addr.to_string());
    assert_eq!(deps[0].kind.as_str(), "HTTP");
    assert!(sink.exceptions().is_empty());

    let requests = sink.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].success);
    let operation = deps[0].operation.as_ref().expect("dependency carries its request");
    assert_eq!(operation.id, requests[0].id);
    assert_eq!(operation.name, "GET /external");
}

#[tokio::test]
async fn unreachable_upstream_is_a_502_with_dependency_and_exception() {
    let (sink, telemetry) = recording();
    let app = spawn(routes::app(telemetry, client(&format!("http://{}/", closed_port().await)))).await;

    let (status, body) = get(&app.url("/external")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, "Upstream request failed");

    let deps = sink.dependencies();
    assert_eq!(deps.len(), 1);
    assert!(!deps[0].success);
    assert_eq!(deps[0].result_code, "ConnectionFailed");

    let exceptions = sink.exceptions();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].type_name, "DependencyError");

    let requests = sink.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status_code, 502);
    assert!(!requests[0].success);
    assert_eq!(exceptions[0].operation.as_ref().map(|op| op.id.clone()), Some(requests[0].id.clone()));
}

#[tokio::test]
async fn upstream_error_status_is_a_failed_dependency() {
    let up = upstream().await;
    let (sink, telemetry) = recording();
    let app = spawn(routes::app(telemetry, client(&up.url("/down")))).await;

    assert_eq!(get(&app.url("/external")).await.0, StatusCode::BAD_GATEWAY);

    let deps = sink.dependencies();
    assert_eq!(deps.len(), 1);
    assert!(!deps[0].success);
    assert_eq!(deps[0].result_code, "503");
    assert_eq!(deps[0].name, "GET /down");
    assert_eq!(sink.exceptions().len(), 1);
}

#[tokio::test]
async fn disabled_collection_categories_are_not_sent() {
    let sink = Arc::new(MemorySink::new());
    let options = TelemetryOptions { dependencies: false, exceptions: false, ..Default::default() };
    let telemetry = Telemetry::new(sink.clone(), options);
    let app = spawn(routes::app(telemetry, client(&format!("http://{}/", closed_port().await)))).await;

    assert_eq!(get(&app.url("/external")).await.0, StatusCode::BAD_GATEWAY);

    assert!(sink.dependencies().is_empty());
    assert!(sink.exceptions().is_empty());
    assert_eq!(sink.requests().len(), 1);
}
