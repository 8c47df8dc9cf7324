//! Telemetry capability.
//!
//! Handlers and middleware never talk to a backend directly. They hold a
//! [`Telemetry`] handle, which is either wired to a [`TelemetrySink`] or
//! disabled. The rest of the code cannot tell the difference:
//!
//! | Handle | Behaviour |
//! |---|---|
//! | [`Telemetry::new`] | records go to the sink; sink errors are logged and dropped |
//! | [`Telemetry::disabled`] | every call returns immediately, the sink is never touched |
//!
//! The handle is an `Arc` inside, so cloning it per request is cheap. The
//! router gives every request its own [`Telemetry::scoped`] clone, which
//! stamps the request's [`Operation`] onto everything emitted through it.
//!
//! ```rust
//! use std::sync::Arc;
//! use beacon::telemetry::{MemorySink, Telemetry, TelemetryOptions};
//!
//! let sink = Arc::new(MemorySink::new());
//! let telemetry = Telemetry::new(sink.clone(), TelemetryOptions::default());
//! telemetry.track_event("Started", [("by", "docs")]);
//! assert_eq!(sink.events().len(), 1);
//! ```

pub mod appinsights;
mod console;
mod memory;
mod record;

use std::sync::Arc;

use tracing::warn;

pub use appinsights::{AppInsightsOptions, AppInsightsSink, ConnectionString};
pub use console::ConsoleLayer;
pub use memory::MemorySink;
pub use record::{
    CustomEvent, DependencyKind, DependencyRecord, ExceptionRecord, Operation, Properties,
    RequestRecord, SeverityLevel, TraceRecord,
};

pub(crate) use record::duration_ms;

// ── Sink contract ─────────────────────────────────────────────────────────────

/// Why a sink refused a record.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected record: {0}")]
    Rejected(String),

    #[error("sink queue is full")]
    QueueFull,

    #[error("sink is closed")]
    Closed,
}

/// A destination for telemetry records.
///
/// Implementations must not block: enqueue the record and return. Any
/// `Err` is logged by the [`Telemetry`] handle and otherwise ignored, so a
/// broken sink can never change the outcome of a request.
pub trait TelemetrySink: Send + Sync + 'static {
    fn track_request(&self, record: RequestRecord) -> Result<(), SinkError>;
    fn track_dependency(&self, record: DependencyRecord) -> Result<(), SinkError>;
    fn track_event(&self, event: CustomEvent) -> Result<(), SinkError>;
    fn track_exception(&self, record: ExceptionRecord) -> Result<(), SinkError>;
    fn track_trace(&self, record: TraceRecord) -> Result<(), SinkError>;
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Per-category collection switches. All on by default.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TelemetryOptions {
    pub requests: bool,
    pub dependencies: bool,
    pub exceptions: bool,
    pub events: bool,
    /// Log lines forwarded by [`ConsoleLayer`].
    pub console: bool,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self { requests: true, dependencies: true, exceptions: true, events: true, console: true }
    }
}

// ── Handle ────────────────────────────────────────────────────────────────────

/// Cheap-to-clone telemetry capability passed to middleware and handlers.
#[derive(Clone)]
pub struct Telemetry {
    sink: Option<Arc<dyn TelemetrySink>>,
    options: TelemetryOptions,
    operation: Option<Arc<Operation>>,
}

impl Telemetry {
    pub fn new(sink: Arc<dyn TelemetrySink>, options: TelemetryOptions) -> Self {
        Self { sink: Some(sink), options, operation: None }
    }

    /// A handle with no sink. Every operation is a no-op.
    pub fn disabled() -> Self {
        Self { sink: None, options: TelemetryOptions::default(), operation: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn collects_console(&self) -> bool {
        self.sink.is_some() && self.options.console
    }

    /// A clone bound to `operation`. Records emitted through it without an
    /// operation of their own are stamped with this one.
    pub fn scoped(&self, operation: Operation) -> Self {
        Self { operation: Some(Arc::new(operation)), ..self.clone() }
    }

    pub fn operation(&self) -> Option<&Operation> {
        self.operation.as_deref()
    }

    pub fn emit_request(&self, record: RequestRecord) {
        if let Some(sink) = self.sink_for(self.options.requests) {
            swallow("request", sink.track_request(record));
        }
    }

    pub fn emit_dependency(&self, mut record: DependencyRecord) {
        if let Some(sink) = self.sink_for(self.options.dependencies) {
            self.stamp(&mut record.operation);
            swallow("dependency", sink.track_dependency(record));
        }
    }

    pub fn emit_exception(&self, mut record: ExceptionRecord) {
        if let Some(sink) = self.sink_for(self.options.exceptions) {
            self.stamp(&mut record.operation);
            swallow("exception", sink.track_exception(record));
        }
    }

    pub fn emit_trace(&self, mut record: TraceRecord) {
        if let Some(sink) = self.sink_for(self.options.console) {
            self.stamp(&mut record.operation);
            swallow("trace", sink.track_trace(record));
        }
    }

    /// Emits a custom event. Fire-and-forget.
    pub fn track_event<I, K, V>(&self, name: &str, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Some(sink) = self.sink_for(self.options.events) {
            let event = CustomEvent {
                name: name.to_owned(),
                properties: properties.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
                operation: self.operation.as_deref().cloned(),
            };
            swallow("event", sink.track_event(event));
        }
    }

    fn sink_for(&self, collect: bool) -> Option<&dyn TelemetrySink> {
        if collect { self.sink.as_deref() } else { None }
    }

    fn stamp(&self, operation: &mut Option<Operation>) {
        if operation.is_none() {
            *operation = self.operation.as_deref().cloned();
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self { Self::disabled() }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("enabled", &self.is_enabled())
            .field("options", &self.options)
            .field("operation", &self.operation)
            .finish()
    }
}

fn swallow(kind: &'static str, res: Result<(), SinkError>) {
    if let Err(e) = res {
        warn!(kind, error = %e, "telemetry record dropped");
    }
}
