use crate::error::SinkError;
use crate::sink::LogSink;

/// Discards every rendered line.
///
/// Load programs use it to measure processing and rendering cost with no
/// I/O at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _line: &str) -> Result<(), SinkError> {
        Ok(())
    }
}
