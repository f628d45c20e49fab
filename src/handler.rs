use std::sync::Arc;

use crate::error::SinkError;
use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::processor::DropEvent;
use crate::processors::format_exc_info;
use crate::queued::QueueHandler;
use crate::record::EventRecord;
use crate::render::{ConsoleRenderer, JsonRenderer};
use crate::sink::LogSink;

/// Identifier of a registered handler.
pub type HandlerId = u64;

/// A sink plus the minimum level it accepts and the final stages that turn
/// a processed record into a line.
pub struct Handler {
    sink: Arc<dyn LogSink>,
    level: Level,
    formatter: Pipeline,
}

impl Handler {
    /// `formatter` runs after the shared chain; its renderer produces the
    /// line written to `sink`.
    pub fn new(sink: Arc<dyn LogSink>, level: Level, formatter: Pipeline) -> Self {
        Self {
            sink,
            level,
            formatter,
        }
    }

    /// JSON lines; unstructured `exc_info` is rendered as a traceback string.
    pub fn json(sink: Arc<dyn LogSink>, level: Level) -> Self {
        let formatter = Pipeline::builder()
            .processor(format_exc_info)
            .renderer(JsonRenderer)
            .build();
        Self::new(sink, level, formatter)
    }

    /// Console lines, colorized when the sink is an interactive terminal.
    pub fn console(sink: Arc<dyn LogSink>, level: Level) -> Self {
        let colors = sink.is_terminal();
        let formatter = Pipeline::builder()
            .renderer(ConsoleRenderer::new(colors))
            .build();
        Self::new(sink, level, formatter)
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    pub fn accepts(&self, level: Level) -> bool {
        level >= self.level
    }

    pub fn render(&self, logger: &str, method: &str, record: EventRecord) -> Result<String, DropEvent> {
        self.formatter.run(logger, method, record)
    }

    pub fn write_line(&self, line: &str) -> Result<(), SinkError> {
        self.sink.write(line)
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        self.sink.flush()
    }

    /// Render, write and flush. Failures are reported on stderr.
    pub fn emit(&self, logger: &str, method: &str, record: EventRecord) {
        let Ok(line) = self.render(logger, method, record) else {
            return;
        };
        if let Err(e) = self.write_line(&line).and_then(|_| self.flush()) {
            eprintln!("log sink write failed: {}", e);
        }
    }
}

/// How a registered handler receives events: in-line on the logging
/// thread, or through a background queue.
#[derive(Clone)]
pub enum Route {
    Direct(Arc<Handler>),
    Queued(QueueHandler),
}

impl Route {
    pub fn level(&self) -> Level {
        match self {
            Route::Direct(handler) => handler.level(),
            Route::Queued(queue) => queue.level(),
        }
    }

    pub fn accepts(&self, level: Level) -> bool {
        level >= self.level()
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Route::Queued(_))
    }

    pub fn handler(&self) -> &Arc<Handler> {
        match self {
            Route::Direct(handler) => handler,
            Route::Queued(queue) => queue.target(),
        }
    }

    /// Deliver one record. The record is owned by this route from here on,
    /// so later changes by the caller cannot reach a queued copy.
    pub fn emit(&self, logger: &str, method: &str, record: EventRecord) {
        match self {
            Route::Direct(handler) => handler.emit(logger, method, record),
            Route::Queued(queue) => {
                queue.enqueue(logger, method, record);
            }
        }
    }
}
