//! Connection string parsing.
//!
//! Application Insights hands out connection strings of the form
//!
//! ```text
//! InstrumentationKey=00000000-0000-0000-0000-000000000000;IngestionEndpoint=https://westeurope-5.in.applicationinsights.azure.com/
//! ```
//!
//! Keys are case-insensitive. Unknown keys (`LiveEndpoint`, `ApplicationId`)
//! are ignored.

use std::str::FromStr;

use crate::error::Error;

const DEFAULT_INGESTION_ENDPOINT: &str = "https://dc.services.visualstudio.com";

/// The parts of a connection string the exporter needs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectionString {
    instrumentation_key: String,
    ingestion_endpoint: String,
}

impl ConnectionString {
    pub fn instrumentation_key(&self) -> &str { &self.instrumentation_key }

    /// Ingestion base URL without a trailing slash.
    pub fn ingestion_endpoint(&self) -> &str { &self.ingestion_endpoint }

    /// Full URL of the batch ingestion API.
    pub fn track_url(&self) -> String {
        format!("{}/v2/track", self.ingestion_endpoint)
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut key = None;
        let mut endpoint = None;
        let mut suffix = None;

        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (k, v) = pair.split_once('=').ok_or_else(|| {
                Error::config(format!("connection string segment `{pair}` is not Key=Value"))
            })?;
            let v = v.trim();
            match k.trim().to_ascii_lowercase().as_str() {
                "instrumentationkey" => key = Some(v.to_owned()),
                "ingestionendpoint"  => endpoint = Some(v.trim_end_matches('/').to_owned()),
                "endpointsuffix"     => suffix = Some(v.trim_matches('.').to_owned()),
                _                    => {}
            }
        }

        let instrumentation_key = key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::config("connection string has no InstrumentationKey"))?;

        let ingestion_endpoint = match (endpoint, suffix) {
            (Some(e), _) if !e.is_empty() => e,
            (_, Some(sfx)) if !sfx.is_empty() => format!("https://dc.{sfx}"),
            _ => DEFAULT_INGESTION_ENDPOINT.to_owned(),
        };

        if !ingestion_endpoint.starts_with("http://") && !ingestion_endpoint.starts_with("https://") {
            return Err(Error::config(format!(
                "IngestionEndpoint `{ingestion_endpoint}` is not an http(s) URL"
            )));
        }

        Ok(Self { instrumentation_key, ingestion_endpoint })
    }
}
