//! Application Insights sink.
//!
//! Records are sampled, converted to envelopes, and pushed onto a bounded
//! channel. A background task drains the channel in batches and posts each
//! batch to the ingestion API:
//!
//! ```text
//! Telemetry::emit_*  ──►  AppInsightsSink  ──try_send──►  mpsc  ──►  exporter task  ──POST──►  /v2/track
//!                         (sample, wrap)                  (bounded)   (batch 64 / 2 s)
//! ```
//!
//! Nothing on the request path ever waits on the network. When the channel
//! is full the record is dropped and the [`Telemetry`](super::Telemetry)
//! handle logs it. Each POST is bounded by `request_timeout` and
//! [`shutdown`](AppInsightsSink::shutdown) by `shutdown_timeout`, so an
//! ingestion endpoint that never answers cannot hold the process past
//! SIGTERM.

mod connection;
mod envelope;
mod exporter;

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::Error;

use super::{
    CustomEvent, DependencyRecord, ExceptionRecord, RequestRecord, SinkError, TelemetrySink,
    TraceRecord,
};

pub use connection::ConnectionString;

use envelope::{Envelope, EnvelopeContext};

/// Sink tuning. Defaults send everything.
#[derive(Clone, Debug)]
pub struct AppInsightsOptions {
    /// `ai.cloud.role` on every envelope.
    pub role_name: String,
    /// Percentage of records kept, `0.0..=100.0`.
    pub sampling_percentage: f64,
    /// Envelopes buffered before new records are dropped.
    pub queue_capacity: usize,
    pub max_batch: usize,
    pub flush_interval: Duration,
    /// Limit on one POST to the ingestion endpoint.
    pub request_timeout: Duration,
    /// Limit on the final flush in [`AppInsightsSink::shutdown`].
    pub shutdown_timeout: Duration,
}

impl Default for AppInsightsOptions {
    fn default() -> Self {
        Self {
            role_name: env!("CARGO_PKG_NAME").to_owned(),
            sampling_percentage: 100.0,
            queue_capacity: 4096,
            max_batch: 64,
            flush_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Sends telemetry to Application Insights.
///
/// Must be created inside a tokio runtime: construction spawns the exporter
/// task. Call [`shutdown`](AppInsightsSink::shutdown) before the runtime
/// stops to flush what is still queued.
pub struct AppInsightsSink {
    context: EnvelopeContext,
    sampling_percentage: f64,
    shutdown_timeout: Duration,
    tx: Mutex<Option<mpsc::Sender<Envelope>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AppInsightsSink {
    pub fn new(connection: ConnectionString, options: AppInsightsOptions) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| Error::config(format!("telemetry http client: {e}")))?;
        Ok(Self::with_client(connection, options, client))
    }

    /// Like [`new`](AppInsightsSink::new), posting through `client` as
    /// given. `options.request_timeout` is not applied to it.
    pub fn with_client(
        connection: ConnectionString,
        options: AppInsightsOptions,
        client: reqwest::Client,
    ) -> Self {
        let sampling_percentage = options.sampling_percentage.clamp(0.0, 100.0);
        let context = EnvelopeContext {
            instrumentation_key: connection.instrumentation_key().to_owned(),
            role_name: options.role_name,
            role_instance: role_instance(),
            sample_rate: sampling_percentage,
        };

        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let exporter = exporter::Exporter {
            client,
            url: connection.track_url(),
            max_batch: options.max_batch.max(1),
            flush_interval: options.flush_interval,
        };
        let worker = tokio::spawn(exporter.run(rx));

        info!(
            endpoint = connection.ingestion_endpoint(),
            sampling = sampling_percentage,
            "application insights sink started",
        );

        Self {
            context,
            sampling_percentage,
            shutdown_timeout: options.shutdown_timeout,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Stops accepting records, flushes the queue, and waits for the
    /// exporter to finish, at most `shutdown_timeout`. Past that the
    /// exporter is aborted and whatever it still holds is lost. Safe to
    /// call more than once.
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());
        let worker = self.worker.lock().take();
        let Some(mut worker) = worker else { return };

        if tokio::time::timeout(self.shutdown_timeout, &mut worker).await.is_err() {
            warn!(
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "telemetry exporter did not finish in time; pending records dropped",
            );
            worker.abort();
        }
    }

    fn send(&self, build: impl FnOnce(&EnvelopeContext) -> Envelope) -> Result<(), SinkError> {
        if !sampled_in(self.sampling_percentage) {
            return Ok(());
        }
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(SinkError::Closed)?;
        tx.try_send(build(&self.context)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_)   => SinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

impl TelemetrySink for AppInsightsSink {
    fn track_request(&self, record: RequestRecord) -> Result<(), SinkError> {
        self.send(|ctx| ctx.request(&record))
    }

    fn track_dependency(&self, record: DependencyRecord) -> Result<(), SinkError> {
        self.send(|ctx| ctx.dependency(&record))
    }

    fn track_event(&self, event: CustomEvent) -> Result<(), SinkError> {
        self.send(|ctx| ctx.event(&event))
    }

    fn track_exception(&self, record: ExceptionRecord) -> Result<(), SinkError> {
        self.send(|ctx| ctx.exception(&record))
    }

    fn track_trace(&self, record: TraceRecord) -> Result<(), SinkError> {
        self.send(|ctx| ctx.trace(&record))
    }
}

/// Per-item sampling decision.
fn sampled_in(percentage: f64) -> bool {
    if percentage >= 100.0 {
        return true;
    }
    if percentage <= 0.0 {
        return false;
    }
    rand::thread_rng().gen_bool(percentage / 100.0)
}

/// Pod name on Kubernetes, machine name elsewhere.
fn role_instance() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_owned())
}
