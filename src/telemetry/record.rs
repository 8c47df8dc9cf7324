//! Telemetry record types.
//!
//! Every record is built once, handed to a sink, and dropped. Nothing here
//! is persisted. Durations are whole milliseconds and can never be negative
//! because they come from [`Instant::elapsed`](std::time::Instant::elapsed).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// Free-form string properties attached to events and exceptions.
pub type Properties = BTreeMap<String, String>;

/// The inbound request a record happened under.
///
/// Dependencies, exceptions, events and traces emitted while a request is
/// being handled carry the request's operation, so the backend can show
/// them beneath it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Id of the request record; shared by everything under it.
    pub id: String,
    /// `GET /path`.
    pub name: String,
}

/// One finalized inbound request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    pub method: String,
    pub path: String,
    pub full_url: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub status_code: u16,
    pub success: bool,
}

impl RequestRecord {
    /// Operation name in the `GET /path` form dashboards group by.
    pub fn name(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// What kind of collaborator an outbound call talked to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DependencyKind {
    Http,
    Other(String),
}

impl DependencyKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Http     => "HTTP",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DependencyKind {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

/// One finalized outbound call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
    pub name: String,
    pub target: String,
    pub data: String,
    pub start_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub result_code: String,
    pub success: bool,
    pub kind: DependencyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

/// A named application event with string properties.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub name: String,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

/// An error observed while handling a request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionRecord {
    pub type_name: String,
    pub message: String,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

/// Severity of a [`TraceRecord`], in the backend's numbering.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum SeverityLevel {
    Verbose     = 0,
    Information = 1,
    Warning     = 2,
    Error       = 3,
    Critical    = 4,
}

impl SeverityLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<&tracing::Level> for SeverityLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN  => Self::Warning,
            tracing::Level::INFO  => Self::Information,
            _                     => Self::Verbose,
        }
    }
}

impl Serialize for SeverityLevel {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(self.as_u8())
    }
}

/// One log line forwarded from the process's `tracing` output.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub message: String,
    pub severity: SeverityLevel,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

/// Whole milliseconds, saturating. A `u64` of milliseconds outlives the
/// process by several hundred million years.
pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_kind_serializes_as_wire_name() {
        assert_eq!(serde_json::to_string(&DependencyKind::Http).unwrap(), r#""HTTP""#);
        assert_eq!(
            serde_json::to_string(&DependencyKind::Other("SQL".into())).unwrap(),
            r#""SQL""#,
        );
    }

    #[test]
    fn request_record_uses_camel_case() {
        let rec = RequestRecord {
            id: "abc".into(),
            method: "GET".into(),
            path: "/slow".into(),
            full_url: "http://localhost/slow".into(),
            start_time: Utc::now(),
            duration_ms: 12,
            status_code: 200,
            success: true,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["fullUrl"], "http://localhost/slow");
        assert_eq!(json["durationMs"], 12);
        assert_eq!(json["statusCode"], 200);
        assert_eq!(rec.name(), "GET /slow");
    }

    #[test]
    fn severity_follows_tracing_levels() {
        assert_eq!(SeverityLevel::from(&tracing::Level::ERROR), SeverityLevel::Error);
        assert_eq!(SeverityLevel::from(&tracing::Level::WARN), SeverityLevel::Warning);
        assert_eq!(SeverityLevel::from(&tracing::Level::INFO), SeverityLevel::Information);
        assert_eq!(SeverityLevel::from(&tracing::Level::TRACE), SeverityLevel::Verbose);
        assert_eq!(serde_json::to_string(&SeverityLevel::Warning).unwrap(), "2");
    }

    #[test]
    fn operation_is_omitted_outside_a_request() {
        let event = CustomEvent { name: "Started".into(), properties: Properties::new(), operation: None };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("operation").is_none());
    }

    #[test]
    fn duration_ms_truncates() {
        assert_eq!(duration_ms(Duration::from_micros(1_999)), 1);
        assert_eq!(duration_ms(Duration::ZERO), 0);
    }
}
