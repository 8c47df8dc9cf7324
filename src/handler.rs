//! Handler trait, type erasure and panic containment.
//!
//! Every route handler is stored as an `Arc<dyn ErasedHandler>`. The erased
//! call is also where a panicking handler is contained: the panic becomes an
//! [`ExceptionRecord`] on the request's telemetry and a `500` response, and
//! the connection stays up.
//!
//! Closures count as handlers too, which is how handlers get at shared state:
//!
//! ```rust,ignore
//! let client = Arc::new(client);
//! router.get("/external", move |req| routes::external(req, Arc::clone(&client)))
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use http::StatusCode;
use tracing::error;

use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::telemetry::{ExceptionRecord, Properties, Telemetry};

/// Exception type recorded for a handler panic.
const PANIC_TYPE: &str = "Panic";

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` because it appears in the public `Handler` trait.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every `async fn` or closure of the shape
/// `Fn(Request) -> impl Future<Output = impl IntoResponse>`. Sealed.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(Contained(self))
    }
}

/// A concrete handler whose panics stop at the request boundary.
struct Contained<F>(F);

impl<F, Fut, R> ErasedHandler for Contained<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let telemetry = req.telemetry().clone();
        let route = format!("{} {}", req.method(), req.path());

        // A closure can panic before it hands back a future.
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.0)(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let res = panicked(&telemetry, &route, payload.as_ref());
                return Box::pin(async move { res });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(res) => res.into_response(),
                Err(payload) => panicked(&telemetry, &route, payload.as_ref()),
            }
        })
    }
}

fn panicked(telemetry: &Telemetry, route: &str, payload: &(dyn Any + Send)) -> Response {
    let message = panic_message(payload);
    error!(route, message = %message, "handler panicked");

    let mut properties = Properties::new();
    properties.insert("route".to_owned(), route.to_owned());
    telemetry.emit_exception(ExceptionRecord {
        type_name: PANIC_TYPE.to_owned(),
        message,
        properties,
        operation: None,
    });

    Response::status(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `panic!("...")` payloads are `&str` or `String`; anything else is opaque.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    use crate::telemetry::{MemorySink, TelemetryOptions};

    fn recording() -> (Arc<MemorySink>, Telemetry) {
        let sink = Arc::new(MemorySink::new());
        let telemetry = Telemetry::new(sink.clone(), TelemetryOptions::default());
        (sink, telemetry)
    }

    async fn boom(_req: Request) -> Response {
        panic!("handler blew up at {}", 42);
    }

    #[tokio::test]
    async fn async_panic_becomes_500_and_an_exception() {
        let (sink, telemetry) = recording();
        let handler = boom.into_boxed_handler();

        let res = handler.call(Request::for_test(Method::GET, "/boom", telemetry)).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let exceptions = sink.exceptions();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].type_name, "Panic");
        assert_eq!(exceptions[0].message, "handler blew up at 42");
        assert_eq!(exceptions[0].properties["route"], "GET /boom");
    }

    #[tokio::test]
    async fn panic_before_the_future_is_contained_too() {
        let (sink, telemetry) = recording();
        let handler = (|_req: Request| -> std::future::Ready<&'static str> {
            panic!("no future for you")
        })
        .into_boxed_handler();

        let res = handler.call(Request::for_test(Method::GET, "/early", telemetry)).await;
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(sink.exceptions()[0].message, "no future for you");
    }

    #[test]
    fn opaque_payloads_get_a_generic_message() {
        assert_eq!(panic_message(&17_u32), "handler panicked");
        assert_eq!(panic_message(&"static"), "static");
    }
}
