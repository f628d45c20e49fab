use std::sync::Arc;

use crate::error::ConfigError;
use crate::level::Level;
use crate::processor::{ProcessResult, Processor};
use crate::record::EventRecord;

/// Runs the wrapped processor only for events whose level lies in the
/// inclusive range `[min_level, max_level]`.
///
/// The level is taken from the method name; unknown method names count as
/// INFO. Outside the range the record passes through unchanged. Inside it,
/// the wrapped processor's outcome (including a drop) is returned as is.
pub struct ConditionalProcessor {
    processor: Arc<dyn Processor>,
    min: Level,
    max: Level,
}

impl ConditionalProcessor {
    pub fn new(processor: Arc<dyn Processor>, min: Level, max: Level) -> Result<Self, ConfigError> {
        if min > max {
            return Err(ConfigError::InvertedLevelRange { min, max });
        }
        Ok(Self {
            processor,
            min,
            max,
        })
    }

    /// Apply to every level.
    pub fn always(processor: Arc<dyn Processor>) -> Self {
        Self {
            processor,
            min: Level::Debug,
            max: Level::Critical,
        }
    }

    /// Build from level names such as `"ERROR"` or `"warning"`.
    pub fn from_names(
        processor: Arc<dyn Processor>,
        min_level: &str,
        max_level: &str,
    ) -> Result<Self, ConfigError> {
        Self::new(processor, min_level.parse()?, max_level.parse()?)
    }

    pub fn applies_to(&self, method: &str) -> bool {
        let level = Level::parse_or(method, Level::Info);
        self.min <= level && level <= self.max
    }
}

impl Processor for ConditionalProcessor {
    fn process(&self, logger: &str, method: &str, record: EventRecord) -> ProcessResult {
        if self.applies_to(method) {
            self.processor.process(logger, method, record)
        } else {
            Ok(record)
        }
    }
}
