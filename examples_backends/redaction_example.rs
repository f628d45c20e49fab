use tracing_log_pipeline::config::{self, LoggingConfig};
use tracing_log_pipeline::exceptions::{CapturedError, ExceptionDictProcessor};
use tracing_log_pipeline::redaction::RedactingProcessor;
use tracing_log_pipeline::sampling::RateLimitingProcessor;
use tracing_log_pipeline::value::Value;
use tracing_log_pipeline::{fields, Logger};

use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let redact = RedactingProcessor::new().with_pattern_strs([r"\b\d{4}-\d{4}-\d{4}-\d{4}\b"]);
    let limit = RateLimitingProcessor::new(3, Duration::from_secs(60))?;

    config::configure(
        LoggingConfig::new("redaction-example")
            .json_logs(std::env::args().all(|a| a != "--console"))
            .processor(redact)
            .processor(limit)
            .processor(ExceptionDictProcessor::default()),
    )?;

    let log = Logger::named("payments");
    log.info(
        "card charged",
        fields! {
            "password" => "hunter2",
            "note" => "card 1234-5678-9012-3456 approved",
            "headers" => Value::map([("Authorization", "Bearer abc"), ("Accept", "*/*")]),
        },
    );

    for attempt in 0..5 {
        log.warning("retrying upstream", fields! { "attempt" => attempt });
    }

    let err = CapturedError::new("TimeoutError", "upstream did not answer")
        .with_cause(CapturedError::new("ConnectionResetError", "peer reset"));
    log.opt().exception(err).error("charge failed", ());
    Ok(())
}
