//! In-process recording sink.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{
    CustomEvent, DependencyRecord, ExceptionRecord, RequestRecord, SinkError, TelemetrySink,
    TraceRecord,
};

/// Keeps every record in memory. Useful in tests and for local debugging.
///
/// [`fail`](MemorySink::fail) flips the sink into a mode where every call is
/// rejected, which is how the tests prove that a broken sink is harmless.
#[derive(Debug, Default)]
pub struct MemorySink {
    requests: Mutex<Vec<RequestRecord>>,
    dependencies: Mutex<Vec<DependencyRecord>>,
    events: Mutex<Vec<CustomEvent>>,
    exceptions: Mutex<Vec<ExceptionRecord>>,
    traces: Mutex<Vec<TraceRecord>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    rejected: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every subsequent call when `on` is true.
    pub fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    /// Number of calls made into the sink, accepted or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RequestRecord> {
        self.requests.lock().clone()
    }

    pub fn dependencies(&self) -> Vec<DependencyRecord> {
        self.dependencies.lock().clone()
    }

    pub fn events(&self) -> Vec<CustomEvent> {
        self.events.lock().clone()
    }

    pub fn exceptions(&self) -> Vec<ExceptionRecord> {
        self.exceptions.lock().clone()
    }

    pub fn traces(&self) -> Vec<TraceRecord> {
        self.traces.lock().clone()
    }

    fn push<T>(&self, into: &Mutex<Vec<T>>, item: T) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(SinkError::Rejected("memory sink is failing".to_owned()));
        }
        into.lock().push(item);
        Ok(())
    }
}

impl TelemetrySink for MemorySink {
    fn track_request(&self, record: RequestRecord) -> Result<(), SinkError> {
        self.push(&self.requests, record)
    }

    fn track_dependency(&self, record: DependencyRecord) -> Result<(), SinkError> {
        self.push(&self.dependencies, record)
    }

    fn track_event(&self, event: CustomEvent) -> Result<(), SinkError> {
        self.push(&self.events, event)
    }

    fn track_exception(&self, record: ExceptionRecord) -> Result<(), SinkError> {
        self.push(&self.exceptions, record)
    }

    fn track_trace(&self, record: TraceRecord) -> Result<(), SinkError> {
        self.push(&self.traces, record)
    }
}
