//! Console collection: `tracing` events forwarded as trace records.
//!
//! [`ConsoleLayer`] sits in the subscriber stack next to the fmt layer, so
//! every line the service logs also reaches the sink. The telemetry
//! pipeline's own logs are never forwarded; a failing sink logs a warning,
//! and forwarding that warning would feed the sink again.

use std::cell::Cell;
use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::{Properties, SeverityLevel, Telemetry, TraceRecord};

/// Most verbose level forwarded.
const MAX_LEVEL: Level = Level::INFO;

const SKIPPED_TARGETS: &[&str] = &["beacon::telemetry", "reqwest", "hyper", "h2"];

thread_local! {
    static FORWARDING: Cell<bool> = const { Cell::new(false) };
}

/// A `tracing_subscriber` layer that emits one [`TraceRecord`] per event.
///
/// ```rust,ignore
/// tracing_subscriber::registry()
///     .with(EnvFilter::new("info"))
///     .with(tracing_subscriber::fmt::layer())
///     .with(ConsoleLayer::new(telemetry))
///     .init();
/// ```
pub struct ConsoleLayer {
    telemetry: Telemetry,
}

impl ConsoleLayer {
    /// Forwards `INFO` and above.
    pub fn new(telemetry: Telemetry) -> Self {
        Self { telemetry }
    }

    fn wants(&self, event: &Event<'_>) -> bool {
        let meta = event.metadata();
        *meta.level() <= MAX_LEVEL
            && self.telemetry.collects_console()
            && !SKIPPED_TARGETS.iter().any(|t| meta.target().starts_with(t))
    }
}

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.wants(event) || FORWARDING.with(Cell::get) {
            return;
        }
        FORWARDING.with(|f| f.set(true));

        let meta = event.metadata();
        let mut fields = Fields::default();
        event.record(&mut fields);
        fields.properties.insert("target".to_owned(), meta.target().to_owned());

        self.telemetry.emit_trace(TraceRecord {
            message: fields.message,
            severity: SeverityLevel::from(meta.level()),
            properties: fields.properties,
            operation: None,
        });

        FORWARDING.with(|f| f.set(false));
    }
}

/// `message` becomes the trace text, every other field a property.
#[derive(Default)]
struct Fields {
    message: String,
    properties: Properties,
}

impl Visit for Fields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.properties.insert(field.name().to_owned(), value.to_owned());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.properties.insert(field.name().to_owned(), format!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tracing_subscriber::layer::SubscriberExt;

    use crate::telemetry::{MemorySink, TelemetryOptions};

    fn with_layer(sink: &Arc<MemorySink>, options: TelemetryOptions, f: impl FnOnce()) {
        let telemetry = Telemetry::new(sink.clone(), options);
        let subscriber = tracing_subscriber::registry().with(ConsoleLayer::new(telemetry));
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn forwards_message_fields_and_severity() {
        let sink = Arc::new(MemorySink::new());
        with_layer(&sink, TelemetryOptions::default(), || {
            tracing::warn!(target: "beacon::routes", error = "refused", attempt = 2, "external dependency failed");
        });

        let traces = sink.traces();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].message, "external dependency failed");
        assert_eq!(traces[0].severity, SeverityLevel::Warning);
        assert_eq!(traces[0].properties["error"], "refused");
        assert_eq!(traces[0].properties["attempt"], "2");
        assert_eq!(traces[0].properties["target"], "beacon::routes");
    }

    #[test]
    fn skips_verbose_levels_and_its_own_pipeline() {
        let sink = Arc::new(MemorySink::new());
        with_layer(&sink, TelemetryOptions::default(), || {
            tracing::debug!(target: "beacon::routes", "too chatty");
            tracing::warn!(target: "beacon::telemetry", "telemetry record dropped");
            tracing::warn!(target: "beacon::telemetry::appinsights::exporter", "batch rejected");
            tracing::info!(target: "hyper::proto", "connection closed");
        });
        assert!(sink.traces().is_empty());
    }

    #[test]
    fn failing_sink_does_not_feed_itself() {
        let sink = Arc::new(MemorySink::new());
        sink.fail(true);
        with_layer(&sink, TelemetryOptions::default(), || {
            tracing::error!(target: "beacon::server", "accept error");
        });
        // the rejection is logged under beacon::telemetry and not forwarded
        assert_eq!(sink.calls(), 1);
        assert_eq!(sink.rejected(), 1);
    }

    #[test]
    fn console_toggle_off_forwards_nothing() {
        let sink = Arc::new(MemorySink::new());
        let options = TelemetryOptions { console: false, ..Default::default() };
        with_layer(&sink, options, || tracing::error!(target: "beacon::server", "lost"));
        assert_eq!(sink.calls(), 0);
    }
}
