//! Startup configuration.
//!
//! Everything comes from the environment and is read exactly once, in
//! `main`. Empty variables count as unset.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `PORT` | `3000` | listen port |
//! | `APPLICATIONINSIGHTS_CONNECTION_STRING` | unset | enables the Application Insights sink |
//! | `APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE` | `100` | share of records sent, `0`–`100` |
//! | `APPLICATIONINSIGHTS_AUTO_COLLECT_REQUESTS` | `true` | |
//! | `APPLICATIONINSIGHTS_AUTO_COLLECT_DEPENDENCIES` | `true` | |
//! | `APPLICATIONINSIGHTS_AUTO_COLLECT_EXCEPTIONS` | `true` | |
//! | `APPLICATIONINSIGHTS_AUTO_COLLECT_EVENTS` | `true` | |
//! | `APPLICATIONINSIGHTS_AUTO_COLLECT_CONSOLE` | `true` | forward log lines as traces |
//! | `APPLICATIONINSIGHTS_ROLE_NAME` | `beacon` | `ai.cloud.role` |
//! | `EXTERNAL_URL` | `https://example.com` | target of `/external` |
//! | `EXTERNAL_TIMEOUT_MS` | unset | outbound timeout; unset waits forever |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::Error;
use crate::outbound::ExternalClient;
use crate::telemetry::{
    AppInsightsOptions, AppInsightsSink, ConnectionString, Telemetry, TelemetryOptions,
};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_EXTERNAL_URL: &str = "https://example.com";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// `None` runs the service with telemetry disabled.
    pub connection_string: Option<ConnectionString>,
    pub sampling_percentage: f64,
    pub collect: TelemetryOptions,
    pub role_name: String,
    pub external_url: String,
    pub external_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connection_string: None,
            sampling_percentage: 100.0,
            collect: TelemetryOptions::default(),
            role_name: env!("CARGO_PKG_NAME").to_owned(),
            external_url: DEFAULT_EXTERNAL_URL.to_owned(),
            external_timeout: None,
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Used directly by tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| Error::config(format!("PORT `{v}` is not a port number")))?,
            None => defaults.port,
        };

        let connection_string = get("APPLICATIONINSIGHTS_CONNECTION_STRING")
            .map(|v| v.parse::<ConnectionString>())
            .transpose()?;

        let sampling_percentage = match get("APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE") {
            Some(v) => parse_percentage(&v)?,
            None => defaults.sampling_percentage,
        };

        let flag = |key: &str| match get(key) {
            Some(v) => parse_bool(key, &v),
            None => Ok(true),
        };
        let collect = TelemetryOptions {
            requests: flag("APPLICATIONINSIGHTS_AUTO_COLLECT_REQUESTS")?,
            dependencies: flag("APPLICATIONINSIGHTS_AUTO_COLLECT_DEPENDENCIES")?,
            exceptions: flag("APPLICATIONINSIGHTS_AUTO_COLLECT_EXCEPTIONS")?,
            events: flag("APPLICATIONINSIGHTS_AUTO_COLLECT_EVENTS")?,
            console: flag("APPLICATIONINSIGHTS_AUTO_COLLECT_CONSOLE")?,
        };

        let external_timeout = match get("EXTERNAL_TIMEOUT_MS") {
            Some(v) => {
                let ms: u64 = v
                    .parse()
                    .map_err(|_| Error::config(format!("EXTERNAL_TIMEOUT_MS `{v}` is not a number")))?;
                Some(Duration::from_millis(ms))
            }
            None => None,
        };

        Ok(Self {
            port,
            connection_string,
            sampling_percentage,
            collect,
            role_name: get("APPLICATIONINSIGHTS_ROLE_NAME").unwrap_or(defaults.role_name),
            external_url: get("EXTERNAL_URL").unwrap_or(defaults.external_url),
            external_timeout,
        })
    }

    /// `0.0.0.0:<port>`.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    /// Resolves the telemetry capability: a live Application Insights sink
    /// when a connection string is present, a disabled handle otherwise.
    ///
    /// The sink is returned separately so the caller can flush it on
    /// shutdown. Must run inside a tokio runtime.
    pub fn telemetry(&self) -> Result<(Telemetry, Option<Arc<AppInsightsSink>>), Error> {
        let Some(connection) = self.connection_string.clone() else {
            warn!("APPLICATIONINSIGHTS_CONNECTION_STRING not set; telemetry disabled");
            return Ok((Telemetry::disabled(), None));
        };

        let options = AppInsightsOptions {
            role_name: self.role_name.clone(),
            sampling_percentage: self.sampling_percentage,
            ..AppInsightsOptions::default()
        };
        let sink = Arc::new(AppInsightsSink::new(connection, options)?);
        info!(collect = ?self.collect, "application insights enabled");
        Ok((Telemetry::new(sink.clone(), self.collect), Some(sink)))
    }

    pub fn external_client(&self) -> Result<ExternalClient, Error> {
        ExternalClient::new(&self.external_url, self.external_timeout)
    }
}

fn parse_percentage(v: &str) -> Result<f64, Error> {
    match v.parse::<f64>() {
        Ok(p) if (0.0..=100.0).contains(&p) => Ok(p),
        _ => Err(Error::config(format!(
            "APPLICATIONINSIGHTS_SAMPLING_PERCENTAGE `{v}` must be between 0 and 100"
        ))),
    }
}

fn parse_bool(key: &str, v: &str) -> Result<bool, Error> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on"  => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key} `{v}` is not a boolean"))),
    }
}
