//! Radix-tree request router.
//!
//! One tree per HTTP method. O(path-length) lookup. Every request that
//! reaches the router, matched or not, is timed by the telemetry middleware.
//! Request bodies are buffered up to [`MAX_BODY_BYTES`]; larger ones are
//! answered `413` without reaching the handler.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::RequestContext;
use crate::request::Request;
use crate::response::Response;
use crate::telemetry::Telemetry;

/// Largest request body a handler will be given.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Each registration returns `self` so calls chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedHandler>>,
    telemetry: Telemetry,
}

impl Router {
    /// An empty router with telemetry disabled.
    pub fn new() -> Self {
        Self { routes: HashMap::new(), telemetry: Telemetry::disabled() }
    }

    /// Attach the telemetry capability. It wraps every request and is handed
    /// to handlers through [`Request::telemetry`].
    pub fn telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Register a handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax and are read with `req.param("name")`.
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered. Routes are fixed at startup, so this is a programming error.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_boxed_handler())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    /// Runs one request through the telemetry middleware and the matching
    /// handler. Unmatched paths answer `404`.
    ///
    /// The [`RequestContext`] lives for the whole call. If this future is
    /// dropped before it completes, the context's finalizer still emits the
    /// request record.
    pub async fn handle<B>(&self, req: http::Request<B>) -> Response
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let ctx = RequestContext::start(&self.telemetry, req.method(), req.uri(), req.headers());
        let res = self.route(req, ctx.telemetry()).await;
        ctx.finish(res.status_code());
        res
    }

    async fn route<B>(&self, req: http::Request<B>, telemetry: &Telemetry) -> Response
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some((handler, params)) = self.lookup(req.method(), req.uri().path()) else {
            return Response::status(StatusCode::NOT_FOUND);
        };

        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                debug!(limit = MAX_BODY_BYTES, "request body too large");
                return Response::status(StatusCode::PAYLOAD_TOO_LARGE);
            }
            Err(e) => {
                debug!(error = %e, "failed to read request body");
                return Response::status(StatusCode::BAD_REQUEST);
            }
        };

        handler.call(Request::new(parts, body, params, telemetry.clone())).await
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
