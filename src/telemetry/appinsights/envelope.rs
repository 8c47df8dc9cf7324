//! Application Insights wire format.
//!
//! One record becomes one envelope. The exporter posts a JSON array of
//! envelopes to `/v2/track`.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::telemetry::{
    CustomEvent, DependencyRecord, ExceptionRecord, Operation, RequestRecord, TraceRecord,
};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Envelope {
    pub name: String,
    pub time: String,
    #[serde(rename = "iKey")]
    pub i_key: String,
    pub sample_rate: f64,
    pub tags: BTreeMap<&'static str, String>,
    pub data: Data,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Data {
    pub base_type: &'static str,
    pub base_data: Value,
}

/// Everything an envelope needs besides the record itself.
#[derive(Clone, Debug)]
pub(crate) struct EnvelopeContext {
    pub instrumentation_key: String,
    pub role_name: String,
    pub role_instance: String,
    pub sample_rate: f64,
}

impl EnvelopeContext {
    fn envelope(
        &self,
        kind: &str,
        base_type: &'static str,
        time: DateTime<Utc>,
        operation: Option<&Operation>,
        base_data: Value,
    ) -> Envelope {
        let mut tags = BTreeMap::new();
        tags.insert("ai.cloud.role", self.role_name.clone());
        tags.insert("ai.cloud.roleInstance", self.role_instance.clone());
        tags.insert("ai.internal.sdkVersion", format!("rust:beacon-{}", env!("CARGO_PKG_VERSION")));
        if let Some(op) = operation {
            tags.insert("ai.operation.id", op.id.clone());
            tags.insert("ai.operation.name", op.name.clone());
        }

        Envelope {
            name: format!(
                "Microsoft.ApplicationInsights.{}.{kind}",
                self.instrumentation_key.replace('-', ""),
            ),
            time: time.to_rfc3339_opts(SecondsFormat::Millis, true),
            i_key: self.instrumentation_key.clone(),
            sample_rate: self.sample_rate,
            tags,
            data: Data { base_type, base_data },
        }
    }

    /// An envelope for something that happened under a request: same
    /// operation id, with the request as parent.
    fn child(
        &self,
        kind: &str,
        base_type: &'static str,
        time: DateTime<Utc>,
        operation: Option<&Operation>,
        base_data: Value,
    ) -> Envelope {
        let mut envelope = self.envelope(kind, base_type, time, operation, base_data);
        if let Some(op) = operation {
            envelope.tags.insert("ai.operation.parentId", op.id.clone());
        }
        envelope
    }

    pub fn request(&self, rec: &RequestRecord) -> Envelope {
        let name = rec.name();
        let base = json!({
            "ver": 2,
            "id": rec.id,
            "name": name,
            "duration": format_duration(rec.duration_ms),
            "responseCode": rec.status_code.to_string(),
            "success": rec.success,
            "url": rec.full_url,
            "properties": {},
        });
        let operation = Operation { id: rec.id.clone(), name };
        self.envelope("Request", "RequestData", rec.start_time, Some(&operation), base)
    }

    pub fn dependency(&self, rec: &DependencyRecord) -> Envelope {
        let base = json!({
            "ver": 2,
            "id": uuid::Uuid::new_v4().simple().to_string(),
            "name": rec.name,
            "resultCode": rec.result_code,
            "duration": format_duration(rec.duration_ms),
            "success": rec.success,
            "data": rec.data,
            "target": rec.target,
            "type": rec.kind.as_str(),
        });
        self.child("RemoteDependency", "RemoteDependencyData", rec.start_time, rec.operation.as_ref(), base)
    }

    pub fn event(&self, ev: &CustomEvent) -> Envelope {
        let base = json!({
            "ver": 2,
            "name": ev.name,
            "properties": ev.properties,
        });
        self.child("Event", "EventData", Utc::now(), ev.operation.as_ref(), base)
    }

    pub fn exception(&self, rec: &ExceptionRecord) -> Envelope {
        let base = json!({
            "ver": 2,
            "exceptions": [{
                "typeName": rec.type_name,
                "message": rec.message,
                "hasFullStack": false,
            }],
            "properties": rec.properties,
        });
        self.child("Exception", "ExceptionData", Utc::now(), rec.operation.as_ref(), base)
    }

    pub fn trace(&self, rec: &TraceRecord) -> Envelope {
        let base = json!({
            "ver": 2,
            "message": rec.message,
            "severityLevel": rec.severity,
            "properties": rec.properties,
        });
        self.child("Message", "MessageData", Utc::now(), rec.operation.as_ref(), base)
    }
}

/// Formats milliseconds as `d.hh:mm:ss.fff`, the timespan format the
/// ingestion API expects.
pub(crate) fn format_duration(ms: u64) -> String {
    let millis = ms % 1000;
    let secs = ms / 1000;
    let (days, hours, minutes, seconds) = (secs / 86_400, secs / 3600 % 24, secs / 60 % 60, secs % 60);
    format!("{days}.{hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}
