use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::handler::HandlerId;
use crate::level::Level;

/// Error returned when a stage, sink or the process-wide configuration is
/// constructed with invalid parameters.
///
/// These are programming errors and are reported at construction time,
/// never from a logging call.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("rate must be between 0.0 and 1.0, got {0}")]
    InvalidRate(f64),

    #[error("max_count must be >= 1, got {0}")]
    InvalidMaxCount(usize),

    #[error("period must be > 0, got {0:?}")]
    InvalidPeriod(Duration),

    #[error("min_level {min} is above max_level {max}")]
    InvertedLevelRange { min: Level, max: Level },

    #[error("unknown log level: {0:?}")]
    UnknownLevel(String),

    #[error("queued logging is already configured; call reset() first")]
    AlreadyQueued,

    #[error("no suitable handler found; call configure() first")]
    NoSuitableHandler,

    #[error("unknown handler id: {0}")]
    UnknownHandler(HandlerId),

    #[error("unsupported sink type: {0}")]
    UnsupportedSink(String),

    #[error("failed to open sink {}: {source}", path.display())]
    OpenSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to start queue worker: {0}")]
    Worker(#[source] io::Error),

    #[error("global tracing subscriber already installed")]
    SubscriberInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Error reported by a [`LogSink`](crate::sink::LogSink) when a rendered
/// line could not be written.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("sink callback panicked")]
    CallbackPanicked,
}
