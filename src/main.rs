//! beacon service entry point.
//!
//! Run with:
//!   RUST_LOG=info cargo run
//!
//! Try:
//!   curl http://localhost:3000/slow
//!   curl http://localhost:3000/external
//!   curl http://localhost:3000/healthz

use std::process::ExitCode;

use beacon::telemetry::ConsoleLayer;
use beacon::{Config, Server, routes};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

#[tokio::main]
async fn main() -> ExitCode {
    // The console layer needs the telemetry handle, which needs the config.
    // It starts empty and is filled in once both exist.
    let (console, console_handle) = reload::Layer::new(None::<ConsoleLayer>);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(console)
        .init();

    let install_console = move |layer: ConsoleLayer| console_handle.reload(Some(layer));

    match run(install_console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    install_console: impl FnOnce(ConsoleLayer) -> Result<(), reload::Error>,
) -> Result<(), beacon::Error> {
    let config = Config::from_env()?;
    let (telemetry, sink) = config.telemetry()?;
    if telemetry.collects_console() {
        if let Err(e) = install_console(ConsoleLayer::new(telemetry.clone())) {
            warn!(error = %e, "console collection unavailable");
        }
    }
    let app = routes::app(telemetry, config.external_client()?);

    let server = Server::bind(config.listen_addr()).await?;
    info!(port = server.local_addr().port(), "listening");
    let served = server.serve(app).await;

    if let Some(sink) = sink {
        sink.shutdown().await;
    }
    served
}
