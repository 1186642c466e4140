use std::fmt;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;

use tracing::warn;

/// Receives progress from a running operation.
///
/// Implementations must be cheap; they are called inline from the operation.
pub trait ProgressSink: Send + Sync {
    fn report(&self, line: &str, processed: usize, total: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, usize, usize) + Send + Sync,
{
    fn report(&self, line: &str, processed: usize, total: usize) {
        self(line, processed, total)
    }
}

/// Handle passed into every operation invocation.
///
/// Reporting never fails from the caller's point of view: a missing sink is a
/// no-op and a panicking sink is contained here.
#[derive(Clone, Default)]
pub struct Progress {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl Progress {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sinks: vec![sink] }
    }

    /// Also deliver every report to `observer`.
    pub fn tee(mut self, observer: Option<Arc<dyn ProgressSink>>) -> Self {
        if let Some(observer) = observer {
            self.sinks.push(observer);
        }
        self
    }

    pub fn emit(&self, line: impl AsRef<str>, processed: usize, total: usize) {
        let line = line.as_ref().trim();
        for sink in &self.sinks {
            let result = catch_unwind(AssertUnwindSafe(|| sink.report(line, processed, total)));
            if result.is_err() {
                warn!(processed, total, "progress sink panicked; report dropped");
            }
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
