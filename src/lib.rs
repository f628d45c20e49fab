//! Structured logging through an ordered chain of processors.
//!
//! Events enter through the [`Logger`] facade or the `tracing` bridge in
//! [`layer`], pass through the shared processor chain installed by
//! [`config::configure`], and are rendered by every handler whose level
//! accepts them, either in-line or through a background queue.

pub mod value;
pub mod record;
pub mod level;
pub mod error;

pub mod processor;
pub mod processors;
pub mod context;
pub mod redaction;
pub mod exceptions;
pub mod sampling;
pub mod routing;
pub mod metrics;
pub mod pipeline;

pub mod render;
pub mod sink;
pub mod noop_sink;
pub mod handler;
pub mod queued;

pub mod config;
pub mod env;
pub mod layer;
pub mod init;
pub mod logger;

pub use config::{configure, reset, shutdown, LoggingConfig};
pub use error::{ConfigError, SinkError};
pub use level::Level;
pub use logger::{logger, Fields, Logger};
pub use pipeline::Pipeline;
pub use processor::{DropEvent, ProcessResult, Processor};
pub use record::EventRecord;
pub use sink::{LogSink, Sink};
pub use value::Value;
