//! Telemetry middleware.
//!
//! Two scopes, one record each:
//!
//! | Scope | Opened by | Emits |
//! |---|---|---|
//! | inbound request | [`RequestContext::start`] (the router does this for every request) | one `RequestRecord` |
//! | outbound call | [`Telemetry::track_dependency`](crate::telemetry::Telemetry::track_dependency) | one `DependencyRecord`, plus an `ExceptionRecord` on failure |
//!
//! Both scopes finalize in `Drop` if they are abandoned, so every exit path
//! produces exactly one terminal record. Scopes share nothing with each
//! other; concurrent requests each carry their own timer.
//!
//! Neither scope can fail the work it observes. Telemetry errors end in a
//! `warn!` log line inside the [`Telemetry`](crate::telemetry::Telemetry)
//! handle.

mod dependency;
mod request;

pub use dependency::{DependencyCall, DependencyOutcome};
pub use request::RequestContext;
