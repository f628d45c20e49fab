use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing_log_pipeline::config::{self, LoggingConfig};
use tracing_log_pipeline::error::SinkError;
use tracing_log_pipeline::queued::QueueConfig;
use tracing_log_pipeline::{fields, LogSink, Logger, Sink};

/// Sink that pretends every write is a slow network round trip.
struct SlowSink {
    latency: Duration,
}

impl LogSink for SlowSink {
    fn write(&self, _line: &str) -> Result<(), SinkError> {
        thread::sleep(self.latency);
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sink = SlowSink {
        latency: Duration::from_micros(200),
    };
    config::configure(LoggingConfig::new("load").stream(Sink::Handler(Arc::new(sink))))?;

    // Tuned: bounded queue, larger batches, fewer retries.
    let listener = config::configure_queued_logging(
        None,
        QueueConfig {
            capacity: Some(20_000),
            batch_size: 512,
            max_retries: 1,
            retry_backoff: Duration::from_millis(5),
        },
    )?;

    let n: u64 = 10_000;
    let log = Logger::named("load");

    let start = Instant::now();
    for i in 0..n {
        log.info("queued load test event", fields! { "iteration" => i });
    }
    let enqueue_elapsed = start.elapsed();

    listener.stop();
    let total_elapsed = start.elapsed();

    let stats = listener.stats();
    println!(
        "queued: {} calls returned in {:?}, drained in {:?} (enqueued={}, delivered={}, dropped={}, failed={})",
        n,
        enqueue_elapsed,
        total_elapsed,
        stats.enqueued(),
        stats.delivered(),
        stats.dropped(),
        stats.failed()
    );

    config::reset();
    Ok(())
}
