//! The service's one outbound dependency.
//!
//! `/external` fetches a fixed URL. The call goes through
//! [`Telemetry::track_dependency`], so every fetch leaves exactly one
//! dependency record, plus an exception record when it fails.
//!
//! No timeout is applied unless one is configured: by default a hung
//! upstream holds the request open for as long as the client waits.

use std::time::Duration;

use http::{Method, StatusCode};
use reqwest::Url;

use crate::error::Error;
use crate::middleware::{DependencyCall, DependencyOutcome};
use crate::telemetry::Telemetry;

/// Why the outbound call failed.
#[derive(Debug, thiserror::Error)]
pub enum DependencyError {
    #[error("request to {url} failed")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },
}

impl DependencyOutcome for DependencyError {
    fn result_code(&self) -> String {
        match self {
            Self::Status { status, .. } => status.as_u16().to_string(),
            Self::Request { source, .. } if source.is_timeout() => "Timeout".to_owned(),
            Self::Request { source, .. } if source.is_connect() => "ConnectionFailed".to_owned(),
            Self::Request { source, .. } => match source.status() {
                Some(status) => status.as_u16().to_string(),
                None         => "Error".to_owned(),
            },
        }
    }
}

/// A successful fetch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fetched {
    pub status: StatusCode,
    pub bytes: usize,
}

impl DependencyOutcome for Fetched {
    fn result_code(&self) -> String {
        self.status.as_u16().to_string()
    }
}

/// HTTP client bound to the external URL.
#[derive(Clone, Debug)]
pub struct ExternalClient {
    http: reqwest::Client,
    url: Url,
}

impl ExternalClient {
    /// A client with reqwest's defaults, including the system proxy
    /// settings, and `timeout` when given.
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| Error::config(format!("external http client: {e}")))?;

        Self::with_client(url, http)
    }

    /// Uses `http` as configured, e.g. built with `no_proxy()`.
    pub fn with_client(url: &str, http: reqwest::Client) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|e| Error::config(format!("external url `{url}`: {e}")))?;
        if url.host_str().is_none() {
            return Err(Error::config(format!("external url `{url}` has no host")));
        }
        Ok(Self { http, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host name the client talks to.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Performs one tracked `GET`. Non-2xx answers are errors.
    pub async fn fetch(&self, telemetry: &Telemetry) -> Result<Fetched, DependencyError> {
        let call = DependencyCall::http(&Method::GET, &self.url);
        telemetry.track_dependency(call, self.get()).await
    }

    async fn get(&self) -> Result<Fetched, DependencyError> {
        let request_failed = |source| DependencyError::Request { url: self.url.to_string(), source };

        let res = self.http.get(self.url.clone()).send().await.map_err(request_failed)?;
        let status = res.status();
        if !status.is_success() {
            return Err(DependencyError::Status { url: self.url.to_string(), status });
        }

        let body = res.bytes().await.map_err(request_failed)?;
        Ok(Fetched { status, bytes: body.len() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_urls() {
        assert!(ExternalClient::new("not a url", None).is_err());
        assert!(ExternalClient::new("unix:/tmp/sock", None).is_err());
    }

    #[test]
    fn custom_client_is_validated_the_same_way() {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        assert!(ExternalClient::with_client("unix:/tmp/sock", http.clone()).is_err());
        let client = ExternalClient::with_client("http://127.0.0.1:8080/ping", http).unwrap();
        assert_eq!(client.host(), "127.0.0.1");
    }

    #[test]
    fn exposes_host() {
        let client = ExternalClient::new("https://example.com", Some(Duration::from_secs(5))).unwrap();
        assert_eq!(client.host(), "example.com");
        assert_eq!(client.url().as_str(), "https://example.com/");
    }

    #[test]
    fn status_errors_report_the_status() {
        let err = DependencyError::Status {
            url: "https://example.com/".into(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        assert_eq!(err.result_code(), "503");
        assert_eq!(err.to_string(), "https://example.com/ answered 503 Service Unavailable");
    }
}
