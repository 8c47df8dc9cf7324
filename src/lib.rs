//! # beacon
//!
//! A small HTTP service that reports its own requests, outbound calls,
//! failures and custom events to a telemetry backend.
//!
//! ## The pieces
//!
//! - [`Router`] / [`Server`]: radix-tree routing over hyper, with graceful
//!   shutdown for Kubernetes.
//! - [`middleware`]: the request and dependency scopes. Each emits exactly
//!   one record per call, on every exit path.
//! - [`telemetry`]: the [`Telemetry`](telemetry::Telemetry) capability, its
//!   sinks, and the console layer that forwards `tracing` output. Without a
//!   sink every operation is a no-op, and the service behaves identically.
//! - [`routes`]: `/healthz`, `/readyz`, `/`, `/slow`, `/external`.
//!
//! ## Wiring it up
//!
//! ```rust,no_run
//! use beacon::{Config, Server, routes};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), beacon::Error> {
//!     let config = Config::from_env()?;
//!     let (telemetry, _sink) = config.telemetry()?;
//!     let app = routes::app(telemetry, config.external_client()?);
//!
//!     Server::bind(config.listen_addr()).await?.serve(app).await
//! }
//! ```
//!
//! Handlers get the capability from the request instead of a global:
//!
//! ```rust
//! use beacon::{Request, Response};
//!
//! async fn checkout(req: Request) -> Response {
//!     req.telemetry().track_event("Checkout", [("items", "3")]);
//!     Response::text("done")
//! }
//! ```

mod error;
mod handler;
mod request;
mod response;
mod router;
mod server;

pub mod config;
pub mod middleware;
pub mod outbound;
pub mod routes;
pub mod telemetry;

pub use config::Config;
pub use error::Error;
pub use handler::Handler;
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{MAX_BODY_BYTES, Router};
pub use server::Server;
