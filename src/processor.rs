use std::fmt;
use std::sync::Arc;

use crate::record::EventRecord;

/// Control-flow signal: discard the current event silently.
///
/// Returned by a stage to stop processing of one event. It is not an
/// error and never reaches the logging call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DropEvent;

impl fmt::Display for DropEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("event dropped")
    }
}

/// Outcome of one stage: the (possibly mutated) record, or [`DropEvent`].
pub type ProcessResult = Result<EventRecord, DropEvent>;

/// One transformation stage of the pipeline.
///
/// `logger` is the name of the logger that produced the event and
/// `method` the level method that was called (`"info"`, `"warning"`, ...).
/// Stateful implementations must be safe to call from many threads at once.
pub trait Processor: Send + Sync {
    fn process(&self, logger: &str, method: &str, record: EventRecord) -> ProcessResult;
}

impl<F> Processor for F
where
    F: Fn(&str, &str, EventRecord) -> ProcessResult + Send + Sync,
{
    fn process(&self, logger: &str, method: &str, record: EventRecord) -> ProcessResult {
        self(logger, method, record)
    }
}

/// Shared handle to a type-erased stage.
pub type SharedProcessor = Arc<dyn Processor>;
